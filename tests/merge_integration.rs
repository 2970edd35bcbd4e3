//! Explicit and background merges

use std::fs;

use loupe::{
    Document, FieldOptions, Generation, Index, IndexSettings, LoupeError, MergePolicyConfig,
    Schema, SegmentId, Term, FAST, INDEXED, STORED, STRING, TEXT,
};
use tempfile::TempDir;

fn schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field("body", TEXT | STORED).unwrap();
    builder.add_text_field("key", STRING | STORED).unwrap();
    builder
        .add_u64_field("rank", FieldOptions::fast_stored())
        .unwrap();
    builder.freeze()
}

fn with_policy(merge_policy: MergePolicyConfig) -> IndexSettings {
    IndexSettings {
        merge_policy,
        ..IndexSettings::default()
    }
}

fn doc(n: u64) -> Document {
    let body = if n % 2 == 0 {
        format!("even merge record {}", n)
    } else {
        format!("odd merge record {}", n)
    };
    Document::new()
        .with("key", format!("k{}", n))
        .with("body", body)
        .with("rank", n)
}

/// Stored records of every live document, in generation order
fn live_records(generation: &Generation) -> Vec<Vec<u8>> {
    let mut records = Vec::new();
    for segment in generation.segments() {
        for doc in 0..segment.num_docs() {
            if segment.live().is_alive(doc) {
                records.push(segment.reader().stored_record(doc).unwrap().to_vec());
            }
        }
    }
    records
}

fn commit_batches(index: &Index, batches: u64, per_batch: u64) {
    let mut writer = index.writer().unwrap();
    for batch in 0..batches {
        for i in 0..per_batch {
            writer.add_document(doc(batch * per_batch + i)).unwrap();
        }
        writer.commit().unwrap();
    }
}

#[test]
fn test_merge_preserves_live_documents() {
    let tmp = TempDir::new().unwrap();
    let index =
        Index::create_in_dir_with_settings(tmp.path(), schema(), with_policy(MergePolicyConfig::NoMerge))
            .unwrap();
    commit_batches(&index, 4, 5);

    let key = index.schema().get_field("key").unwrap();
    let mut writer = index.writer().unwrap();
    for n in [1u64, 6, 7, 18] {
        writer
            .delete_documents(Term::from_field_text(key, &format!("k{}", n)))
            .unwrap();
    }
    writer.commit().unwrap();

    let before = index.current_generation();
    let expected = live_records(&before);
    assert_eq!(expected.len(), 16);

    let merged = writer.merge(&before.segment_ids()).unwrap().unwrap();
    let after = index.current_generation();
    assert_eq!(after.segment_ids(), vec![merged]);
    assert_eq!(after.num_alive(), 16);
    assert_eq!(after.num_docs(), 16);
    assert_eq!(live_records(&after), expected);

    let searcher = index.searcher();
    assert_eq!(searcher.search_str("even", 100).unwrap().len(), 8);
    assert!(searcher.search_str("key:k6", 10).unwrap().is_empty());
    assert_eq!(searcher.search_str("rank:[10 TO 19]", 100).unwrap().len(), 9);
    assert_eq!(
        searcher.search_str("\"merge record\"", 100).unwrap().len(),
        16
    );
}

#[test]
fn test_merge_subset_keeps_segment_order() {
    let index =
        Index::create_in_ram_with_settings(schema(), with_policy(MergePolicyConfig::NoMerge)).unwrap();
    commit_batches(&index, 4, 2);
    let ids = index.searchable_segment_ids();

    let writer = index.writer().unwrap();
    let merged = writer.merge(&ids[1..3]).unwrap().unwrap();
    let after = index.searchable_segment_ids();
    assert_eq!(after.len(), 3);
    assert!(after.contains(&ids[0]));
    assert!(after.contains(&ids[3]));
    assert!(after.contains(&merged));
    assert_eq!(index.searcher().num_docs(), 8);
}

#[test]
fn test_commit_drops_emptied_segments() {
    let index =
        Index::create_in_ram_with_settings(schema(), with_policy(MergePolicyConfig::NoMerge)).unwrap();
    commit_batches(&index, 3, 2);
    let key = index.schema().get_field("key").unwrap();
    let ids = index.searchable_segment_ids();

    let mut writer = index.writer().unwrap();
    // thin out the second segment, then delete its last document
    writer
        .delete_documents(Term::from_field_text(key, "k2"))
        .unwrap();
    writer.commit().unwrap();
    let remaining = index.searchable_segment_ids();
    assert_eq!(remaining, ids);

    writer
        .delete_documents(Term::from_field_text(key, "k3"))
        .unwrap();
    writer.commit().unwrap();
    // a segment without live documents leaves the generation on commit
    assert_eq!(index.searchable_segment_ids(), vec![ids[0], ids[2]]);
    assert_eq!(index.searcher().num_docs(), 4);
}

#[test]
fn test_merge_rejects_unknown_segments() {
    let index =
        Index::create_in_ram_with_settings(schema(), with_policy(MergePolicyConfig::NoMerge)).unwrap();
    commit_batches(&index, 1, 1);
    let writer = index.writer().unwrap();
    assert!(matches!(
        writer.merge(&[SegmentId(999)]),
        Err(LoupeError::InvalidArgument(_))
    ));
    assert!(matches!(
        writer.merge(&[]),
        Err(LoupeError::InvalidArgument(_))
    ));
}

#[test]
fn test_background_merges_compact_segments() {
    let tmp = TempDir::new().unwrap();
    let policy = MergePolicyConfig::Log {
        min_num_segments: 3,
        max_docs_before_merge: 10_000_000,
        del_docs_ratio_before_merge: 1.0,
        level_log_size: 0.75,
        min_layer_size: 100,
    };
    let index = Index::create_in_dir_with_settings(tmp.path(), schema(), with_policy(policy)).unwrap();

    let mut writer = index.writer().unwrap();
    for batch in 0..9u64 {
        for i in 0..3 {
            writer.add_document(doc(batch * 3 + i)).unwrap();
        }
        writer.commit().unwrap();
    }
    writer.wait_merging_threads().unwrap();

    let searcher = index.searcher();
    assert_eq!(searcher.num_docs(), 27);
    assert!(
        searcher.segment_ids().len() < 9,
        "expected merges, found {} segments",
        searcher.segment_ids().len()
    );
    assert_eq!(searcher.search_str("odd", 100).unwrap().len(), 13);
    assert!(index.metrics().merges.get() > 0.0);

    writer.close().unwrap();
    let reopened = Index::open_in_dir(tmp.path()).unwrap();
    assert_eq!(reopened.searcher().num_docs(), 27);
    assert_eq!(
        reopened.searchable_segment_ids(),
        index.searchable_segment_ids()
    );
}

#[test]
fn test_search_results_identical_across_repeats() {
    let index =
        Index::create_in_ram_with_settings(schema(), with_policy(MergePolicyConfig::NoMerge)).unwrap();
    commit_batches(&index, 3, 4);
    let searcher = index.searcher();
    let plan = searcher.parse_query("even OR record^0.5 -key:k4").unwrap();

    let first = searcher.search(&plan, 7).unwrap();
    for _ in 0..5 {
        assert_eq!(searcher.search(&plan, 7).unwrap(), first);
    }
    let ordinals: Vec<u64> = first.iter().map(|h| h.global_ordinal).collect();
    // even documents score higher; ties break on ascending ordinal
    assert_eq!(ordinals, vec![0, 2, 6, 8, 10, 1, 3]);
}

fn catalog_schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field("title", TEXT | STORED).unwrap();
    builder.add_text_field("sku", STRING | STORED).unwrap();
    builder.add_u64_field("stock", INDEXED | STORED).unwrap();
    builder.add_i64_field("balance", INDEXED | FAST).unwrap();
    builder.add_f64_field("price", FAST | STORED).unwrap();
    builder.add_bytes_field("digest", INDEXED | STORED).unwrap();
    builder
        .add_facet_field("category", FieldOptions::indexed_stored())
        .unwrap();
    builder.add_json_field("attrs", INDEXED | STORED).unwrap();
    builder.freeze()
}

const CATALOG: [&str; 4] = [
    r#"{"title":"Rust in Action","sku":"B-001","stock":3,"balance":-20,"price":39.5,"digest":"aGVsbG8=","category":"/books/rust","attrs":{"format":"paperback","pages":456,"signed":true}}"#,
    r#"{"title":"Programming Elixir","sku":"B-002","stock":0,"balance":15,"price":29.0,"digest":"d29ybGQ=","category":"/books/elixir","attrs":{"format":"ebook","pages":340}}"#,
    r#"{"title":"Cast Iron Cooking","sku":"K-100","stock":12,"balance":-5,"price":12.25,"category":["/kitchen/cookware","/featured"],"attrs":{"format":"hardcover","pages":120.5}}"#,
    r#"{"title":"The Rust Programming Language","sku":"B-003","stock":3,"balance":0,"price":45.0,"digest":"aGVsbG8=","category":"/books/rust","attrs":{"format":"paperback","signed":false}}"#,
];

#[test]
fn test_merge_keeps_every_field_kind_searchable() {
    let tmp = TempDir::new().unwrap();
    let index = Index::create_in_dir_with_settings(
        tmp.path(),
        catalog_schema(),
        with_policy(MergePolicyConfig::NoMerge),
    )
    .unwrap();
    let mut writer = index.writer().unwrap();
    for json in CATALOG {
        writer
            .add_document(Document::from_json(index.schema(), json).unwrap())
            .unwrap();
        writer.commit().unwrap();
    }
    let queries = [
        ("rust", 2),
        ("stock:3", 2),
        ("balance:-5", 1),
        ("price:[20 TO 40]", 2),
        ("digest:aGVsbG8=", 2),
        ("category:/books", 3),
        ("category:/featured", 1),
        ("/kitchen", 1),
        ("attrs.format:paperback", 2),
        ("attrs.pages:340", 1),
        ("attrs.pages:120.50", 1),
        ("attrs.signed:true", 1),
        ("attrs.signed:false", 1),
        ("\"programming language\"", 1),
    ];
    let counts = |index: &Index| -> Vec<usize> {
        let searcher = index.searcher();
        queries
            .iter()
            .map(|(query, _)| searcher.search_str(query, 100).unwrap().len())
            .collect()
    };
    let expected: Vec<usize> = queries.iter().map(|(_, n)| *n).collect();
    assert_eq!(counts(&index), expected);

    let merged = writer.merge(&index.searchable_segment_ids()).unwrap().unwrap();
    assert_eq!(index.searchable_segment_ids(), vec![merged]);
    assert_eq!(counts(&index), expected);

    writer.close().unwrap();
    let reopened = Index::open_in_dir(tmp.path()).unwrap();
    assert_eq!(counts(&reopened), expected);
}

#[test]
fn test_failed_background_merge_is_not_retried() {
    let tmp = TempDir::new().unwrap();
    let policy = MergePolicyConfig::Log {
        min_num_segments: 2,
        max_docs_before_merge: 1000,
        del_docs_ratio_before_merge: 1.0,
        level_log_size: 0.75,
        min_layer_size: 10,
    };
    let index = Index::create_in_dir_with_settings(tmp.path(), schema(), with_policy(policy)).unwrap();
    // the first two commits write segments 0 and 1; the merge of both gets 2
    let blocker = tmp.path().join(SegmentId(2).dir_name());
    fs::write(&blocker, b"not a directory").unwrap();

    let mut writer = index.writer().unwrap();
    writer.add_document(doc(0)).unwrap();
    writer.commit().unwrap();
    writer.add_document(doc(1)).unwrap();
    writer.commit().unwrap();
    assert!(writer.wait_merging_threads().is_err());
    assert_eq!(index.searchable_segment_ids(), vec![SegmentId(0), SegmentId(1)]);

    // later commits do not pick the failed inputs up again
    writer.add_document(doc(2)).unwrap();
    writer.commit().unwrap();
    writer.wait_merging_threads().unwrap();
    assert_eq!(index.searchable_segment_ids().len(), 3);
    assert_eq!(index.searcher().num_docs(), 3);

    writer.close().unwrap();
    fs::remove_file(&blocker).ok();
    let reopened = Index::open_in_dir(tmp.path()).unwrap();
    assert_eq!(reopened.searcher().num_docs(), 3);
}
