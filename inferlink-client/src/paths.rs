use std::fmt;

/// Listing of the inferences of one model for one patient.
pub const INFERENCES_PATH: &str = "api/models/{model_id}/patients/{patient_mrn}/inferences/";

/// Errors produced while rendering a resource path template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// The template names a placeholder no parameter was given for.
    #[error("no value for placeholder {{{0}}}")]
    MissingParameter(String),

    /// A `{` without its closing `}`.
    #[error("unterminated placeholder in template {0:?}")]
    Unterminated(String),

    /// A value that would change the shape of the path.
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: String, value: String },
}

/// Substitute `{name}` placeholders in a resource path template.
///
/// Values must be non-empty and must not contain `/`, `?` or `#`.
///
/// # Examples
///
/// ```
/// use inferlink_client::paths::{render_path, INFERENCES_PATH};
///
/// let path = render_path(INFERENCES_PATH, &[("model_id", "m1"), ("patient_mrn", "p1")]).unwrap();
/// assert_eq!(path, "api/models/m1/patients/p1/inferences/");
/// ```
pub fn render_path(template: &str, params: &[(&str, &str)]) -> Result<String, PathError> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| PathError::Unterminated(template.to_string()))?;
        let name = &after[..close];

        let value = params
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
            .ok_or_else(|| PathError::MissingParameter(name.to_string()))?;

        if value.is_empty() || value.contains(['/', '?', '#']) {
            return Err(PathError::InvalidValue {
                name: name.to_string(),
                value: value.to_string(),
            });
        }

        rendered.push_str(value);
        rest = &after[close + 1..];
    }

    rendered.push_str(rest);
    Ok(rendered)
}

/// Typed form of [`INFERENCES_PATH`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferencesPath<'a> {
    pub model_id: &'a str,
    pub patient_mrn: &'a str,
}

impl InferencesPath<'_> {
    /// Render into a path relative to the base URL.
    pub fn render(&self) -> Result<String, PathError> {
        render_path(
            INFERENCES_PATH,
            &[("model_id", self.model_id), ("patient_mrn", self.patient_mrn)],
        )
    }
}

impl fmt::Display for InferencesPath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model {} / patient {}", self.model_id, self.patient_mrn)
    }
}
