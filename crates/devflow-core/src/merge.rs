//! 依存サービス定義のマージ規則
//!
//! - リスト: 大文字小文字を区別しない和集合（先に現れた表記を保持）
//! - スカラー: 最初に現れた非nullの値を採用

use std::collections::BTreeMap;

/// 同じ種別の定義同士を1つに畳み込む
pub trait Merge: Sized {
    fn merge(self, other: Self) -> Self;
}

/// 最初の非null値を採用
pub fn first_non_null<T>(left: Option<T>, right: Option<T>) -> Option<T> {
    left.or(right)
}

/// 大文字小文字を区別しない和集合
///
/// 出現順を保持し、重複は最初の表記を残します。
pub fn union_ignore_case(left: Vec<String>, right: Vec<String>) -> Vec<String> {
    let mut result: Vec<String> = Vec::with_capacity(left.len() + right.len());
    for item in left.into_iter().chain(right) {
        if !result.iter().any(|existing| existing.eq_ignore_ascii_case(&item)) {
            result.push(item);
        }
    }
    result
}

/// トピック → サブスクリプションのマップ同士の和集合
///
/// トピック名・サブスクリプションともに大文字小文字を区別しません。
pub fn union_topics(
    left: BTreeMap<String, Vec<String>>,
    right: BTreeMap<String, Vec<String>>,
) -> BTreeMap<String, Vec<String>> {
    let mut result = left;
    for (topic, subscriptions) in right {
        let existing = result
            .keys()
            .find(|k| k.eq_ignore_ascii_case(&topic))
            .cloned();
        match existing {
            Some(key) => {
                let current = result.remove(&key).unwrap_or_default();
                result.insert(key, union_ignore_case(current, subscriptions));
            }
            None => {
                result.insert(topic, union_ignore_case(Vec::new(), subscriptions));
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn normalized(items: Vec<String>) -> Vec<String> {
        let mut items: Vec<String> = items.into_iter().map(|s| s.to_lowercase()).collect();
        items.sort();
        items
    }

    #[test]
    fn test_first_non_null() {
        assert_eq!(first_non_null(None, Some(2)), Some(2));
        assert_eq!(first_non_null(Some(1), Some(2)), Some(1));
        assert_eq!(first_non_null::<i32>(None, None), None);
    }

    #[test]
    fn test_union_ignore_case_keeps_first_spelling() {
        let merged = union_ignore_case(list(&["Orders", "users"]), list(&["orders", "audit"]));
        assert_eq!(merged, list(&["Orders", "users", "audit"]));
    }

    #[test]
    fn test_union_is_associative() {
        let a = list(&["a", "B"]);
        let b = list(&["b", "c"]);
        let c = list(&["C", "d"]);

        let left = union_ignore_case(union_ignore_case(a.clone(), b.clone()), c.clone());
        let right = union_ignore_case(a, union_ignore_case(b, c));
        assert_eq!(left, right);
    }

    #[test]
    fn test_union_is_commutative_as_set() {
        let a = list(&["x", "Y", "z"]);
        let b = list(&["y", "w"]);

        assert_eq!(
            normalized(union_ignore_case(a.clone(), b.clone())),
            normalized(union_ignore_case(b, a))
        );
    }

    #[test]
    fn test_union_is_idempotent() {
        let a = list(&["x", "y"]);
        assert_eq!(union_ignore_case(a.clone(), a.clone()), a);
    }

    #[test]
    fn test_union_topics() {
        let mut left = BTreeMap::new();
        left.insert("Orders".to_string(), list(&["http://a"]));

        let mut right = BTreeMap::new();
        right.insert("orders".to_string(), list(&["HTTP://A", "http://b"]));
        right.insert("payments".to_string(), list(&[]));

        let merged = union_topics(left, right);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["Orders"], list(&["http://a", "http://b"]));
        assert!(merged["payments"].is_empty());
    }

    #[test]
    fn test_union_topics_is_idempotent() {
        let mut a = BTreeMap::new();
        a.insert("orders".to_string(), list(&["http://a", "http://b"]));
        assert_eq!(union_topics(a.clone(), a.clone()), a);
    }
}
