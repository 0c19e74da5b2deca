use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::sync::model::FieldMapping;
use crate::sync::NewJob;

/// One row of the caller's mapping table
#[derive(Deserialize, Serialize, Debug, Clone, Validate)]
pub struct FieldMappingRequest {
    #[validate(length(
        min = 1,
        max = 128,
        message = "destination_field must be between 1 and 128 characters"
    ))]
    pub destination_field: String,
    #[validate(length(
        min = 1,
        max = 256,
        message = "source_field must be between 1 and 256 characters"
    ))]
    pub source_field: String,
}

/// Request body for starting a sync job
#[derive(Deserialize, Serialize, Debug, Validate)]
pub struct CreateJobRequest {
    #[validate(length(
        min = 1,
        max = 64,
        message = "source_type must be between 1 and 64 characters"
    ))]
    pub source_type: String,

    #[validate(length(
        min = 1,
        max = 128,
        message = "source_id must be between 1 and 128 characters"
    ))]
    pub source_id: String,

    #[validate(length(max = 255, message = "source_name must be at most 255 characters"))]
    pub source_name: Option<String>,

    /// Existing destination list to append to
    #[validate(length(
        min = 1,
        max = 128,
        message = "destination_id must be between 1 and 128 characters"
    ))]
    pub destination_id: Option<String>,

    /// Name for a new destination list when no id is given
    #[validate(length(max = 255, message = "destination_name must be at most 255 characters"))]
    pub destination_name: Option<String>,

    #[validate(
        length(min = 1, message = "At least one field mapping is required"),
        nested
    )]
    pub field_mappings: Vec<FieldMappingRequest>,

    #[validate(range(min = 0, message = "total_profiles cannot be negative"))]
    pub total_profiles: Option<i64>,
}

impl From<CreateJobRequest> for NewJob {
    fn from(req: CreateJobRequest) -> Self {
        NewJob {
            source_type: req.source_type,
            source_id: req.source_id,
            source_name: req.source_name,
            destination_id: req.destination_id,
            destination_name: req.destination_name,
            field_mappings: req
                .field_mappings
                .into_iter()
                .map(|m| FieldMapping::new(m.destination_field, m.source_field))
                .collect(),
            total_profiles: req.total_profiles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreateJobRequest {
        serde_json::from_value(serde_json::json!({
            "source_type": "segment",
            "source_id": "seg-1",
            "field_mappings": [
                { "destination_field": "phone_number", "source_field": "phone" }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_minimal_request_is_valid() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_empty_mapping_table_is_rejected() {
        let mut req = request();
        req.field_mappings.clear();
        let errors = req.validate().unwrap_err();
        assert!(errors.errors().contains_key("field_mappings"));
    }

    #[test]
    fn test_blank_destination_id_is_rejected() {
        let mut req = request();
        req.destination_id = Some(String::new());
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_converts_mappings_in_order() {
        let mut req = request();
        req.field_mappings.push(FieldMappingRequest {
            destination_field: "first_name".into(),
            source_field: "profile.first".into(),
        });
        let job: NewJob = req.into();
        assert_eq!(job.field_mappings[1], FieldMapping::new("first_name", "profile.first"));
        assert_eq!(job.total_profiles, None);
    }
}
