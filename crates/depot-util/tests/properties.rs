use std::collections::BTreeMap;

use depot_util::properties::{load, parse, render};
use tempfile::TempDir;

#[test]
fn test_file_round_trip() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("_remote.repositories");

    let mut map = BTreeMap::new();
    map.insert("lib-1.0.jar>central".to_string(), String::new());
    map.insert("lib-1.0.jar>".to_string(), String::new());
    std::fs::write(&path, render(&map, Some(" internal"))).unwrap();

    let loaded = load(&path).unwrap();
    assert_eq!(loaded, map);
}

#[test]
fn test_load_missing_file() {
    let tmp = TempDir::new().unwrap();
    let loaded = load(&tmp.path().join("absent.properties")).unwrap();
    assert!(loaded.is_empty());
}

#[test]
fn test_parse_skips_garbage_lines() {
    let map = parse(b"# header\nvalid=1\n\n  \nbare-key\n");
    assert_eq!(map.get("valid").map(String::as_str), Some("1"));
    assert_eq!(map.get("bare-key").map(String::as_str), Some(""));
    assert_eq!(map.len(), 2);
}

#[test]
fn test_values_keep_embedded_equals() {
    let map = parse(b"key=a=b=c\n");
    assert_eq!(map.get("key").map(String::as_str), Some("a=b=c"));
}
