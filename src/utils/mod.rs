pub mod security;

pub use security::{
    is_path_traversal, is_unsafe_file_path, join_key, sanitize_filename, validate_chatflow_id,
    validate_org_id, validate_path_security,
};
