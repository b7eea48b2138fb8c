use uuid::Uuid;

/// Generates an identifier for a tool call that arrived without one.
pub(crate) fn new_call_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("call_{}", &uuid[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_id_format() {
        let id = new_call_id();
        assert!(id.starts_with("call_"));
        assert_eq!(id.len(), "call_".len() + 12);
        assert_ne!(id, new_call_id());
    }
}
