/// On-disk record schema versions. All versions share one processing
/// algorithm; what differs is a handful of field and enum names captured by
/// [`FieldAdapter`], so migrations are pure data transforms between
/// adjacent adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SchemaVersion {
    V3,
    V4,
    V5,
}

impl SchemaVersion {
    pub const CURRENT: SchemaVersion = SchemaVersion::V5;

    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaVersion::V3 => "3.0",
            SchemaVersion::V4 => "4.0",
            SchemaVersion::V5 => "5.0",
        }
    }

    pub fn parse(s: &str) -> Option<SchemaVersion> {
        match s.trim() {
            "3.0" | "3" => Some(SchemaVersion::V3),
            "4.0" | "4" | "4.1" => Some(SchemaVersion::V4),
            "5.0" | "5" => Some(SchemaVersion::V5),
            _ => None,
        }
    }

    pub fn next(&self) -> Option<SchemaVersion> {
        match self {
            SchemaVersion::V3 => Some(SchemaVersion::V4),
            SchemaVersion::V4 => Some(SchemaVersion::V5),
            SchemaVersion::V5 => None,
        }
    }
}

/// Per-version field and enum names for the assessment shape.
#[derive(Debug, Clone, Copy)]
pub struct FieldAdapter {
    pub version: SchemaVersion,
}

impl FieldAdapter {
    pub fn new(version: SchemaVersion) -> Self {
        FieldAdapter { version }
    }

    /// Name of the sub-component bag on an assessment.
    pub fn details_field(&self) -> &'static str {
        match self.version {
            SchemaVersion::V3 => "summative_details",
            _ => "evaluation_details",
        }
    }

    /// Wire name of the board-participation assessment type.
    pub fn board_solving_name(&self) -> &'static str {
        match self.version {
            SchemaVersion::V3 => "participation",
            _ => "board_solving",
        }
    }

    /// Wire name of the SD topic-test assessment type. v3 filed these under
    /// the same name as unit summatives.
    pub fn topic_test_name(&self) -> &'static str {
        match self.version {
            SchemaVersion::V3 => "summative",
            _ => "test",
        }
    }

    /// v4 introduced `assessment_id` / `assessment_title` labels.
    pub fn has_assessment_labels(&self) -> bool {
        self.version >= SchemaVersion::V4
    }
}
