//! Range rules for GPS fixes, shared by request payloads and the write path.

use validator::ValidationError;

pub fn validate_latitude(lat: f64) -> Result<(), ValidationError> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(ValidationError::new("latitude_out_of_range"));
    }
    Ok(())
}

pub fn validate_longitude(lng: f64) -> Result<(), ValidationError> {
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(ValidationError::new("longitude_out_of_range"));
    }
    Ok(())
}

/// Speed in m/s; must be finite and non-negative.
pub fn validate_speed(speed: f64) -> Result<(), ValidationError> {
    if !speed.is_finite() || speed < 0.0 {
        return Err(ValidationError::new("speed_out_of_range"));
    }
    Ok(())
}

/// Heading in degrees, `[0, 360)`.
pub fn validate_heading(heading: f64) -> Result<(), ValidationError> {
    if !heading.is_finite() || !(0.0..360.0).contains(&heading) {
        return Err(ValidationError::new("heading_out_of_range"));
    }
    Ok(())
}

pub fn validate_accuracy(accuracy: f64) -> Result<(), ValidationError> {
    if !accuracy.is_finite() || accuracy < 0.0 {
        return Err(ValidationError::new("accuracy_out_of_range"));
    }
    Ok(())
}

/// Altitude only needs to be a real number.
pub fn validate_altitude(altitude: f64) -> Result<(), ValidationError> {
    if !altitude.is_finite() {
        return Err(ValidationError::new("altitude_not_finite"));
    }
    Ok(())
}

/// Train numbers are short printable identifiers, also used in cache and
/// object keys.
pub fn validate_train_number(train_number: &str) -> Result<(), ValidationError> {
    if train_number.is_empty() || train_number.len() > 32 {
        return Err(ValidationError::new("train_number_invalid_length"));
    }
    if !train_number
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::new("train_number_invalid_characters"));
    }
    Ok(())
}
