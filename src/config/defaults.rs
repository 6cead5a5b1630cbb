pub(super) fn default_record_separator() -> String {
    crate::parser::DEFAULT_RECORD_SEPARATOR.to_string()
}

pub(super) fn default_field_separator() -> String {
    crate::parser::DEFAULT_FIELD_SEPARATOR.to_string()
}

pub(super) fn default_policy() -> String {
    "leaky-bucket".to_string()
}

pub(super) fn default_scope() -> String {
    "api-key".to_string()
}

pub(super) const fn default_cache_size() -> usize {
    16
}
