mod handlers;
pub mod service;
mod types;

pub use handlers::*;
pub use service::{find_contact, find_or_create_contact, first_wallet_user};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_request_distinguishes_null() {
        let req: UpdateContactRequest =
            serde_json::from_str(r#"{"email": null, "name": "Ana"}"#).unwrap();
        assert_eq!(req.name.as_deref(), Some("Ana"));
        assert_eq!(req.email, Some(None));
        assert_eq!(req.profile_pic_url, None);
    }

    #[test]
    fn test_create_request_defaults() {
        let req: CreateContactRequest =
            serde_json::from_str(r#"{"name": "Ana", "number": "+55 (11) 9999-0000"}"#).unwrap();
        assert!(!req.is_group);
        assert!(req.extra_info.is_none());
    }
}
