pub mod span;
pub mod trace;

pub use span::{Annotation, BinaryAnnotation, Endpoint, Span, TagValue};
pub use trace::Trace;
