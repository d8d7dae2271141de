//! Validation helpers for DTOs.

use validator::ValidationError;

/// Validates a poll's option list: at least two choices, at most 20, none of
/// them blank after trimming.
pub fn validate_poll_options(options: &[String]) -> Result<(), ValidationError> {
    if options.len() < 2 {
        let mut err = ValidationError::new("options_count");
        err.message = Some("A poll needs at least two options".into());
        return Err(err);
    }
    if options.len() > 20 {
        let mut err = ValidationError::new("options_count");
        err.message = Some(format!("A poll allows at most 20 options (got {})", options.len()).into());
        return Err(err);
    }
    if options.iter().any(|option| option.trim().is_empty()) {
        let mut err = ValidationError::new("options_blank");
        err.message = Some("Poll options must not be blank".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(options: &[&str]) -> Vec<String> {
        options.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_validate_poll_options_valid() {
        assert!(validate_poll_options(&owned(&["yes", "no"])).is_ok());
        assert!(validate_poll_options(&owned(&["a", "b", "c", "d"])).is_ok());
    }

    #[test]
    fn test_validate_poll_options_too_few() {
        assert!(validate_poll_options(&[]).is_err());
        assert!(validate_poll_options(&owned(&["only"])).is_err());
    }

    #[test]
    fn test_validate_poll_options_too_many() {
        let many = vec!["x".to_string(); 21];
        assert!(validate_poll_options(&many).is_err());
    }

    #[test]
    fn test_validate_poll_options_blank() {
        assert!(validate_poll_options(&owned(&["yes", ""])).is_err());
        assert!(validate_poll_options(&owned(&["yes", "   "])).is_err());
    }
}
