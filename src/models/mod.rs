//! Output artifacts

/// The ranked similarity report and its serialized forms.
pub mod report;
