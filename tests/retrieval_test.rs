//! Retrieval index tests against the bundled schema notes

use std::io::Write;

use nl2sql_engine::retrieval::{RetrievalIndex, FALLBACK_CONTEXT};

const CORPUS: &str = include_str!("../data/schema_docs.txt");

#[test]
fn test_bundled_corpus_loads() {
    let index = RetrievalIndex::from_text(CORPUS);
    assert!(index.is_loaded());
    assert!(index.len() >= 10);
}

#[test]
fn test_region_question_retrieves_region_note() {
    let index = RetrievalIndex::from_text(CORPUS);
    let results = index.search("filter the north region", 1);
    assert_eq!(results.len(), 1);
    assert!(results[0].starts_with("Regions are"));
}

#[test]
fn test_month_question_retrieves_date_note() {
    let index = RetrievalIndex::from_text(CORPUS);
    let results = index.search("sales by month", 3);
    assert!(results.iter().any(|doc| doc.contains("strftime")));
}

#[test]
fn test_context_block_format() {
    let index = RetrievalIndex::from_text(CORPUS);
    let context = index.get_context("average sale value", 2);
    assert!(context.starts_with("Database Schema Context:\n\n[Context 1]\n"));
    assert!(context.contains("[Context 2]"));
    assert!(!context.contains("[Context 3]"));
}

#[test]
fn test_results_are_bounded_and_positive() {
    let index = RetrievalIndex::from_text(CORPUS);
    let scored = index.search_scored("total revenue sum amount per product", 3);
    assert!(scored.len() <= 3);
    assert!(scored.iter().all(|(score, _)| *score > 0));
    assert!(scored.windows(2).all(|pair| pair[0].0 >= pair[1].0));
}

#[test]
fn test_missing_file_degrades_to_fallback() {
    let index = RetrievalIndex::from_path("/nonexistent/schema_docs.txt");
    assert!(!index.is_loaded());
    assert!(index.is_empty());
    assert_eq!(index.get_context("total sales", 3), FALLBACK_CONTEXT);
}

#[test]
fn test_loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "Orders live in table sales.\n\nRegions are North and South.").unwrap();
    let index = RetrievalIndex::from_path(file.path());
    assert_eq!(index.len(), 2);
    assert_eq!(index.search("which regions exist", 1), vec!["Regions are North and South."]);
}
