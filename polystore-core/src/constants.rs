//! TigerStyle Constants
//!
//! All limits use big-endian naming: `CATEGORY_SPECIFICS_UNIT_LIMIT`
//! Example: `LIMITS_BATCH_COUNT_DEFAULT` (not `DEFAULT_BATCH`)
//!
//! Every constant includes units in the name:
//! - _`COUNT_MAX/DEFAULT` for quantity limits
//! - _`CHARS_MIN/MAX` for string lengths
//! - _MS for milliseconds

// =============================================================================
// Addressing
// =============================================================================

/// Collection placeholder for a lone-segment path whose collection is
/// supplied later by the caller.
pub const MISSING_COLLECTION: &str = "__missing__";

/// Alias used when an address carries no backend prefix.
pub const BACKEND_ALIAS_DEFAULT: &str = "@default";

/// Separator between collection and uid segments.
pub const PATH_SEPARATOR: char = '/';

/// Separator between a backend alias and the path.
pub const BACKEND_SEPARATOR: char = ':';

/// Maximum number of (collection, uid) pairs in one address.
pub const PATH_DEPTH_COUNT_MAX: usize = 16;

// =============================================================================
// Query Limits
// =============================================================================

/// Batch literal meaning "no limit".
pub const BATCH_UNLIMITED: i64 = -1;

/// Default page size for queries.
pub const LIMITS_BATCH_COUNT_DEFAULT: usize = 20;

/// Default offset for queries.
pub const LIMITS_OFFSET_DEFAULT: usize = 0;

/// Maximum number of filters accepted by a single query.
pub const QUERY_FILTERS_COUNT_MAX: usize = 64;

// =============================================================================
// Values
// =============================================================================

/// Fractional-second digits kept on datetimes, the finest precision every
/// backend stores.
pub const DATETIME_SUBSEC_DIGITS_MAX: u16 = 6;

// =============================================================================
// Reserved Property Names
// =============================================================================

/// Primary-key pseudo property usable in filters and sortings.
pub const PROPERTY_UID: &str = "uid";

/// Synthetic property populated by the keywords middleware.
pub const PROPERTY_KEYWORDS: &str = "keywords";

/// Soft-delete status property.
pub const PROPERTY_STATUS: &str = "status";

/// Default parent property for sub-collection models.
pub const PROPERTY_PARENT: &str = "parent";

/// Default label property.
pub const PROPERTY_NAME: &str = "name";

/// Metadata properties stamped by the meta middleware.
pub const PROPERTY_CREATED_AT: &str = "created_at";
/// See [`PROPERTY_CREATED_AT`].
pub const PROPERTY_CREATED_BY: &str = "created_by";
/// See [`PROPERTY_CREATED_AT`].
pub const PROPERTY_UPDATED_AT: &str = "updated_at";
/// See [`PROPERTY_CREATED_AT`].
pub const PROPERTY_UPDATED_BY: &str = "updated_by";
/// See [`PROPERTY_CREATED_AT`].
pub const PROPERTY_DELETED_AT: &str = "deleted_at";
/// See [`PROPERTY_CREATED_AT`].
pub const PROPERTY_DELETED_BY: &str = "deleted_by";

/// Model name referenced by `*_by` metadata properties.
pub const USER_MODEL_NAME: &str = "User";

// =============================================================================
// Status Values
// =============================================================================

/// Status of a freshly created record.
pub const STATUS_CREATED: &str = "created";
/// Status of a record awaiting processing.
pub const STATUS_PENDING: &str = "pending";
/// Status of an active record.
pub const STATUS_ACTIVE: &str = "active";
/// Status written by a soft delete.
pub const STATUS_DELETED: &str = "deleted";

// =============================================================================
// Keywords
// =============================================================================

/// Shortest keyword prefix materialised for search-as-you-type.
pub const KEYWORDS_PREFIX_CHARS_MIN: usize = 2;

/// Longest word indexed by the keywords middleware.
pub const KEYWORDS_WORD_CHARS_MAX: usize = 64;

// =============================================================================
// Identifiers
// =============================================================================

/// Maximum length of a table, column or alias identifier.
pub const SQL_IDENTIFIER_CHARS_MAX: usize = 63;

// =============================================================================
// DST (Deterministic Simulation Testing)
// =============================================================================

/// Maximum fault probability.
pub const DST_FAULT_PROBABILITY_MAX: f64 = 1.0;

/// Number of seeds used by the seeded property checks.
pub const DST_PROPERTY_SEEDS_COUNT: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_are_sane() {
        assert!(LIMITS_BATCH_COUNT_DEFAULT > 0);
        assert_eq!(BATCH_UNLIMITED, -1);
        assert!(KEYWORDS_PREFIX_CHARS_MIN < KEYWORDS_WORD_CHARS_MAX);
    }

    #[test]
    fn test_reserved_names_are_distinct() {
        let names = [PROPERTY_UID, PROPERTY_KEYWORDS, PROPERTY_STATUS, PROPERTY_PARENT];
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
