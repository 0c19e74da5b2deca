use actix_web::HttpResponse;
use serde::Serialize;
use validator::{ValidationErrors, ValidationErrorsKind};

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub fields: serde_json::Value,
}

fn bad_request(
    error: &str,
    fields: serde_json::Map<String, serde_json::Value>,
) -> actix_web::Error {
    let error_response = ErrorResponse {
        error: error.to_string(),
        fields: serde_json::Value::Object(fields),
    };
    actix_web::error::InternalError::from_response(
        "",
        HttpResponse::BadRequest().json(error_response),
    )
    .into()
}

/// Flattens validation errors into `path -> {errors: [...]}`. Rows of the
/// mapping table show up as `field_mappings[2].source_field`.
pub fn collect_errors(
    prefix: &str,
    errors: &ValidationErrors,
    out: &mut serde_json::Map<String, serde_json::Value>,
) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(errs) => {
                let messages: Vec<String> = errs
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| format!("Validation error in field: {}", field))
                    })
                    .collect();
                out.insert(path, serde_json::json!({ "errors": messages }));
            }
            ValidationErrorsKind::Struct(inner) => collect_errors(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (i, inner) in items {
                    collect_errors(&format!("{path}[{i}]"), inner, out);
                }
            }
        }
    }
}

/// Creates a configured JsonConfig with standardized error handling for the entire project
pub fn json_config() -> actix_web_validator::JsonConfig {
    actix_web_validator::JsonConfig::default().error_handler(|err, _req| {
        let mut fields = serde_json::Map::new();

        match err {
            actix_web_validator::Error::Validate(validation_errors) => {
                collect_errors("", &validation_errors, &mut fields);
                bad_request("Validation failed", fields)
            }
            actix_web_validator::Error::Deserialize(de_err) => {
                let err_string = de_err.to_string();

                let message = if err_string.contains("EOF while parsing") {
                    "Request body is empty. Expected JSON payload".to_string()
                } else if err_string.contains("missing field") {
                    // serde's wording already names the field
                    err_string
                } else {
                    "Invalid JSON format".to_string()
                };
                fields.insert("message".to_string(), serde_json::json!(message));
                bad_request("Request validation failed", fields)
            }
            _ => {
                fields.insert("message".to_string(), serde_json::json!("Validation error"));
                bad_request("Validation failed", fields)
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::job::CreateJobRequest;
    use validator::Validate;

    #[test]
    fn test_nested_mapping_errors_get_indexed_paths() {
        let req: CreateJobRequest = serde_json::from_value(serde_json::json!({
            "source_type": "segment",
            "source_id": "seg-1",
            "field_mappings": [
                { "destination_field": "phone_number", "source_field": "phone" },
                { "destination_field": "first_name", "source_field": "" }
            ]
        }))
        .unwrap();

        let errors = req.validate().unwrap_err();
        let mut fields = serde_json::Map::new();
        collect_errors("", &errors, &mut fields);

        let entry = &fields["field_mappings[1].source_field"];
        assert_eq!(
            entry["errors"][0],
            "source_field must be between 1 and 256 characters"
        );
        assert!(!fields.contains_key("field_mappings[0].source_field"));
    }
}
