pub mod tests {
    use crate::{BlobHeaders, BLOB_NAME_HEADER, CONTENT_TYPE_HEADER, CREATED_BY_HEADER};

    pub const TEST_BLOB_STORE: &str = "test_store";
    pub const TEST_MEMBER_A: &str = "member_a";
    pub const TEST_MEMBER_B: &str = "member_b";
    pub const TEST_GROUP: &str = "test_group";

    pub fn mock_headers(blob_name: &str) -> BlobHeaders {
        BlobHeaders::from([
            (BLOB_NAME_HEADER.to_string(), blob_name.to_string()),
            (CREATED_BY_HEADER.to_string(), "tester".to_string()),
            (
                CONTENT_TYPE_HEADER.to_string(),
                "application/octet-stream".to_string(),
            ),
        ])
    }
}
