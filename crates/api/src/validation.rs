use crate::error::ApiError;
use validator::Validate;

/// Runs derive-based validation and folds the failures into one stable,
/// field-sorted message for the error envelope.
pub fn validate<T: Validate>(value: &T) -> Result<(), ApiError> {
    value.validate().map_err(|errs| {
        let mut parts: Vec<String> = errs
            .field_errors()
            .into_iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| match &error.message {
                    Some(message) => format!("{field}: {message}"),
                    None => format!("{field}: {}", error.code),
                })
            })
            .collect();
        parts.sort();
        ApiError::Validation(parts.join("; "))
    })
}
