use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }

            pub fn all() -> &'static [$name] {
                &[$(Self::$variant),+]
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(ReviewState {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

impl ReviewState {
    /// Approved and rejected records accept no further transition.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

str_enum!(Role {
    Admin => "admin",
    Hr => "hr",
    Finance => "finance",
    Legal => "legal",
    Engineer => "engineer",
});

str_enum!(Capability {
    HrRecords => "hr_records",
    FinanceRecords => "finance_records",
    LegalRecords => "legal_records",
    EngineeringRecords => "engineering_records",
});

str_enum!(TargetCollection {
    Employee => "employee",
    Attendance => "attendance",
    Payroll => "payroll",
    Invoice => "invoice",
    Budget => "budget",
    Transaction => "transaction",
    FinanceReport => "finance_report",
    Contract => "contract",
    Policy => "policy",
    Case => "case",
    Regulatory => "regulatory",
    Project => "project",
    Task => "task",
    Maintenance => "maintenance",
    Report => "report",
});

// What happens to an OCR result once its target record exists.
str_enum!(RetentionPolicy {
    KeepApproved => "keep_approved",
    Remove => "remove",
});

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::KeepApproved
    }
}
