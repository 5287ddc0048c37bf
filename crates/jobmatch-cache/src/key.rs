//! Cache key derivation for match results.
//!
//! A key is a pure function of the requester, the profile source, the
//! compiled [`FilterPredicate`] (already normalized and sorted, with the
//! merged exclusion ids folded in), and the ordering and page. Equivalent
//! requests therefore share a key regardless of input order, and any change
//! to the exclusions produces a different one.

use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use jobmatch_core::{FilterPredicate, MatchRequest, ProfileSource, Result};

/// Bumped whenever the key material layout changes.
const KEY_VERSION: u8 = 1;

#[derive(Serialize)]
struct KeyMaterial<'a> {
    version: u8,
    requester_id: Uuid,
    profile: String,
    predicate: &'a FilterPredicate,
    sort: &'static str,
    offset: usize,
    limit: usize,
}

fn profile_fingerprint(profile: &ProfileSource) -> String {
    match profile {
        ProfileSource::Stored => "stored".to_string(),
        ProfileSource::Inline(vector) => {
            let mut hasher = Sha256::new();
            for v in vector {
                hasher.update(v.to_le_bytes());
            }
            format!("inline:{}", hex::encode(hasher.finalize()))
        }
    }
}

/// Derive the cache key for `request` under `namespace`.
///
/// `predicate` must be the request's compiled predicate including the
/// requester's stored exclusions.
pub fn match_cache_key(
    namespace: &str,
    request: &MatchRequest,
    predicate: &FilterPredicate,
) -> Result<String> {
    let material = KeyMaterial {
        version: KEY_VERSION,
        requester_id: request.requester_id,
        profile: profile_fingerprint(&request.profile),
        predicate,
        sort: request.filters.sort.as_str(),
        offset: request.filters.offset,
        limit: request.filters.limit,
    };
    let canonical = serde_json::to_vec(&material)?;
    let hash = hex::encode(Sha256::digest(&canonical));
    Ok(format!("{}{}", namespace, &hash[..32]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobmatch_core::{ExclusionSet, MatchFilters, QueryBuilder, RawJobId, SortStrategy};

    const NS: &str = "jm:match:";

    fn key_for(filters: MatchFilters, exclusions: ExclusionSet, requester: Uuid) -> String {
        let predicate = QueryBuilder::build(&filters, &exclusions).unwrap();
        let request = MatchRequest::for_stored_profile(requester, filters);
        match_cache_key(NS, &request, &predicate).unwrap()
    }

    #[test]
    fn test_key_is_idempotent() {
        let requester = Uuid::new_v4();
        let f = || MatchFilters::new().with_country("Germany").with_keywords(["python"]);
        assert_eq!(
            key_for(f(), ExclusionSet::new(), requester),
            key_for(f(), ExclusionSet::new(), requester)
        );
    }

    #[test]
    fn test_keyword_order_does_not_matter() {
        let requester = Uuid::new_v4();
        let a = key_for(
            MatchFilters::new().with_keywords(["python", "fastapi"]),
            ExclusionSet::new(),
            requester,
        );
        let b = key_for(
            MatchFilters::new().with_keywords(["FastAPI ", "python"]),
            ExclusionSet::new(),
            requester,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_exclusion_representation_does_not_matter() {
        let requester = Uuid::new_v4();
        let a = key_for(
            MatchFilters::new(),
            ExclusionSet::new().with_applied([3_i64, 1]),
            requester,
        );
        let b = key_for(
            MatchFilters::new(),
            ExclusionSet::new()
                .with_applied([RawJobId::Text("1".into())])
                .with_cooled([3_i64, 3]),
            requester,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_exclusion_change_changes_key() {
        let requester = Uuid::new_v4();
        let a = key_for(MatchFilters::new(), ExclusionSet::new(), requester);
        let b = key_for(
            MatchFilters::new(),
            ExclusionSet::new().with_cooled([42_i64]),
            requester,
        );
        assert_ne!(a, b);
    }

    #[test]
    fn test_requester_page_and_sort_change_key() {
        let requester = Uuid::new_v4();
        let base = key_for(MatchFilters::new(), ExclusionSet::new(), requester);
        assert_ne!(base, key_for(MatchFilters::new(), ExclusionSet::new(), Uuid::new_v4()));
        assert_ne!(
            base,
            key_for(MatchFilters::new().page(20, 20), ExclusionSet::new(), requester)
        );
        assert_ne!(
            base,
            key_for(
                MatchFilters::new().sorted_by(SortStrategy::Recency),
                ExclusionSet::new(),
                requester
            )
        );
    }

    #[test]
    fn test_inline_vector_is_part_of_key() {
        let requester = Uuid::new_v4();
        let predicate = FilterPredicate::default();
        let a = MatchRequest::for_vector(requester, vec![0.1, 0.2], MatchFilters::new());
        let b = MatchRequest::for_vector(requester, vec![0.2, 0.1], MatchFilters::new());
        assert_ne!(
            match_cache_key(NS, &a, &predicate).unwrap(),
            match_cache_key(NS, &b, &predicate).unwrap()
        );
    }

    #[test]
    fn test_key_prefix() {
        let key = key_for(MatchFilters::new(), ExclusionSet::new(), Uuid::new_v4());
        assert!(key.starts_with(NS));
        assert_eq!(key.len(), NS.len() + 32);
    }
}
