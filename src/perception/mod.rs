pub mod content;
pub mod extractor;
pub mod selector;
pub mod vision;


pub use content::extract_main_content;
pub use extractor::PageStateExtractor;
pub use vision::{Analysis, IdentifiedElement, VisionAnalyzer, VisionContext};
