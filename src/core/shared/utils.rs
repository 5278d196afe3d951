use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::core::error::{AppError, AppResult};

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub fn create_conn(database_url: &str) -> Result<DbPool, diesel::r2d2::PoolError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder().build(manager)
}

/// Run database migrations
pub fn run_migrations(pool: &DbPool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

    const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

    let mut conn = pool.get()?;
    let applied = conn.run_pending_migrations(MIGRATIONS)?;
    for version in applied {
        log::info!("Applied migration {version}");
    }
    Ok(())
}

/// Keeps digits only, the canonical form used for contact numbers.
pub fn normalize_number(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Deserializes a present-but-null field as `Some(None)` so patches can clear columns.
pub fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    serde::Deserialize::deserialize(de).map(Some)
}

/// Truncates on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// One page of a listing. Built only through [`Page::new`], which guarantees
/// the offset fits in an `i64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: i64,
    pub size: i64,
    pub offset: i64,
}

impl Page {
    /// Pages below 1 read as the first; a page whose offset would overflow is
    /// rejected with `ERR_INVALID_PAGE`.
    pub fn new(number: Option<i64>, size: i64) -> AppResult<Self> {
        let number = number.unwrap_or(1).max(1);
        let offset = (number - 1)
            .checked_mul(size)
            .ok_or_else(|| AppError::bad_request("ERR_INVALID_PAGE"))?;
        Ok(Self {
            number,
            size,
            offset,
        })
    }

    pub fn has_more(&self, total: i64) -> bool {
        self.offset.saturating_add(self.size) < total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_number() {
        assert_eq!(normalize_number("+55 (11) 98765-4321"), "5511987654321");
        assert_eq!(normalize_number("abc"), "");
    }

    #[test]
    fn test_generate_token_is_random_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_token_is_stable() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
        assert_eq!(hash_token("abc").len(), 64);
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("olá mundo", 3), "olá");
    }

    #[test]
    fn test_page_offsets() {
        let page = Page::new(None, 20).unwrap();
        assert_eq!((page.number, page.offset), (1, 0));
        let page = Page::new(Some(-4), 20).unwrap();
        assert_eq!(page.offset, 0);
        let page = Page::new(Some(3), 20).unwrap();
        assert_eq!(page.offset, 40);
        assert!(page.has_more(61));
        assert!(!page.has_more(60));
    }

    #[test]
    fn test_page_overflow_is_rejected() {
        let err = Page::new(Some(i64::MAX), 20).unwrap_err();
        assert_eq!(err.to_string(), "ERR_INVALID_PAGE");
        let last = Page::new(Some(i64::MAX / 20), 20).unwrap();
        assert!(last.has_more(i64::MAX));
        assert!(!last.has_more(last.offset + last.size));
        let saturated = Page {
            number: 2,
            size: 20,
            offset: i64::MAX,
        };
        assert!(!saturated.has_more(i64::MAX));
    }
}
