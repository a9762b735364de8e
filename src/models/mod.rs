pub mod enums;
pub mod ocr_result;
pub mod target_record;

pub use enums::*;
pub use ocr_result::*;
pub use target_record::*;
