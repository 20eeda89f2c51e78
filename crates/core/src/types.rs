/// Generation set identifiers are opaque strings assigned by the backend.
pub type SetId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
