//! Document templates for `tmt new`

pub mod template;

pub use template::{TemplateContext, TemplateError, TemplateGenerator};
