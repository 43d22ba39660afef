use crate::crypto::sha256_hex;

/// Literal hashed in place of a root when a batch has no transactions.
pub const EMPTY_MERKLE_INPUT: &str = "empty";

/// Merkle root over transaction identifiers, in the given order.
///
/// - no ids: `sha256("empty")`
/// - one id: `sha256(id)`
/// - otherwise every id is digested first, then adjacent digests are hashed
///   pairwise left to right. An odd level pairs its last digest with itself.
pub fn compute_merkle_root<S: AsRef<str>>(ids: &[S]) -> String {
    match ids {
        [] => sha256_hex(EMPTY_MERKLE_INPUT),
        [only] => sha256_hex(only.as_ref()),
        _ => {
            let mut level: Vec<String> = ids.iter().map(|id| sha256_hex(id.as_ref())).collect();
            while level.len() > 1 {
                level = level
                    .chunks(2)
                    .map(|pair| {
                        let left = &pair[0];
                        let right = pair.get(1).unwrap_or(left);
                        sha256_hex(&format!("{}{}", left, right))
                    })
                    .collect();
            }
            level.swap_remove(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(s: &str) -> String {
        sha256_hex(s)
    }

    fn pair(a: &str, b: &str) -> String {
        h(&format!("{}{}", a, b))
    }

    #[test]
    fn test_empty_root() {
        let ids: [&str; 0] = [];
        assert_eq!(compute_merkle_root(&ids), h("empty"));
    }

    #[test]
    fn test_single_leaf_is_hashed_once() {
        assert_eq!(compute_merkle_root(&["x"]), h("x"));
        assert_ne!(compute_merkle_root(&["x"]), "x");
    }

    #[test]
    fn test_two_leaves_are_predigested() {
        let expected = pair(&h("a"), &h("b"));
        assert_eq!(compute_merkle_root(&["a", "b"]), expected);
        assert_ne!(compute_merkle_root(&["a", "b"]), pair("a", "b"));
    }

    #[test]
    fn test_odd_leaf_is_duplicated() {
        let (a, b, c) = (h("a"), h("b"), h("c"));
        let expected = pair(&pair(&a, &b), &pair(&c, &c));
        assert_eq!(compute_merkle_root(&["a", "b", "c"]), expected);

        // Carrying `c` up unchanged would give a different root.
        let carried = pair(&pair(&a, &b), &c);
        assert_ne!(compute_merkle_root(&["a", "b", "c"]), carried);
    }

    #[test]
    fn test_five_leaves_duplicate_on_every_odd_level() {
        let l: Vec<String> = ["1", "2", "3", "4", "5"].iter().map(|s| h(s)).collect();
        let level1 = [pair(&l[0], &l[1]), pair(&l[2], &l[3]), pair(&l[4], &l[4])];
        let level2 = [pair(&level1[0], &level1[1]), pair(&level1[2], &level1[2])];
        let root = pair(&level2[0], &level2[1]);
        assert_eq!(compute_merkle_root(&["1", "2", "3", "4", "5"]), root);
    }

    #[test]
    fn test_deterministic_and_order_sensitive() {
        let ids = vec!["tx-a".to_string(), "tx-b".to_string(), "tx-c".to_string()];
        assert_eq!(compute_merkle_root(&ids), compute_merkle_root(&ids));

        let mut reordered = ids.clone();
        reordered.swap(0, 2);
        assert_ne!(compute_merkle_root(&ids), compute_merkle_root(&reordered));
    }
}
