//! Query language against a committed index

use loupe::{
    Document, Facet, FieldOptions, Index, LoupeError, QueryError, Schema, Searcher, Term, FAST,
    INDEXED, STORED, STRING, TEXT,
};

fn catalog_schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field("title", TEXT | STORED).unwrap();
    builder
        .add_text_field("body", TEXT.with_tokenizer("en_stem"))
        .unwrap();
    builder.add_text_field("sku", STRING | STORED).unwrap();
    builder
        .add_i64_field("balance", FieldOptions::fast_stored())
        .unwrap();
    builder.add_f64_field("price", FAST | STORED).unwrap();
    builder.add_u64_field("stock", INDEXED | STORED).unwrap();
    builder.add_bytes_field("digest", INDEXED | STORED).unwrap();
    builder
        .add_facet_field("category", FieldOptions::indexed_stored())
        .unwrap();
    builder.add_json_field("attrs", TEXT | STORED).unwrap();
    builder.freeze()
}

const CATALOG: [&str; 5] = [
    r#"{"title":"Rust in Action","body":"Systems programming with ownership","sku":"B-001","balance":-20,"price":39.5,"stock":3,"digest":"aGVsbG8=","category":"/books/programming/rust","attrs":{"format":"paperback","pages":456,"signed":true}}"#,
    r#"{"title":"Programming Elixir","body":"Functional programs running on the BEAM","sku":"B-002","balance":15,"price":29.0,"stock":0,"digest":"d29ybGQ=","category":"/books/programming/elixir","attrs":{"format":"ebook","pages":340}}"#,
    r#"{"title":"The Rust Programming Language","body":"The official book, programming Rust from scratch","sku":"B-003","balance":0,"price":45.0,"stock":7,"category":["/books/programming/rust","/featured"],"attrs":{"format":"paperback","pages":552,"dims":{"height":23}}}"#,
    r#"{"title":"Cast Iron Cooking","body":"Skillets and ovens","sku":"K-100","balance":-5,"price":12.25,"stock":12,"category":"/kitchen/cookware","attrs":{"format":"hardcover"}}"#,
    r#"{"title":"Rust Removal Guide","body":"Keeping cast iron clean","sku":"K-101","balance":8,"price":5.0,"stock":3,"category":"/kitchen/care"}"#,
];

fn catalog() -> Searcher {
    let index = Index::create_in_ram(catalog_schema()).unwrap();
    let mut writer = index.writer().unwrap();
    for (i, json) in CATALOG.iter().enumerate() {
        writer
            .add_document(Document::from_json(index.schema(), json).unwrap())
            .unwrap();
        // two segments, so cross-segment behavior is covered
        if i == 2 {
            writer.commit().unwrap();
        }
    }
    writer.commit().unwrap();
    index.searcher()
}

fn skus(searcher: &Searcher, query: &str) -> Vec<String> {
    let mut skus: Vec<String> = searcher
        .search_documents(query, 100)
        .unwrap()
        .into_iter()
        .map(|(_, doc)| doc.get_first("sku").and_then(|v| v.as_str()).unwrap().to_string())
        .collect();
    skus.sort();
    skus
}

fn query_error(searcher: &Searcher, query: &str) -> QueryError {
    match searcher.parse_query(query) {
        Err(LoupeError::Query(err)) => err,
        other => panic!("expected a query error for {:?}, got {:?}", query, other),
    }
}

#[test]
fn test_terms_and_default_fields() {
    let searcher = catalog();
    assert_eq!(skus(&searcher, "rust"), vec!["B-001", "B-003", "K-101"]);
    assert_eq!(skus(&searcher, "title:rust"), vec!["B-001", "B-003", "K-101"]);
    // body is stemmed: "programs" and "programming" share a stem
    assert_eq!(skus(&searcher, "body:programs"), vec!["B-001", "B-002", "B-003"]);
    assert_eq!(skus(&searcher, "sku:K-100"), vec!["K-100"]);
    // raw fields are not lowercased
    assert!(skus(&searcher, "sku:k-100").is_empty());
}

#[test]
fn test_boolean_operators() {
    let searcher = catalog();
    assert_eq!(skus(&searcher, "rust AND programming"), vec!["B-001", "B-003"]);
    assert_eq!(
        skus(&searcher, "rust OR elixir"),
        vec!["B-001", "B-002", "B-003", "K-101"]
    );
    assert_eq!(skus(&searcher, "rust -programming"), vec!["K-101"]);
    assert_eq!(skus(&searcher, "rust AND NOT title:guide"), vec!["B-001", "B-003"]);
    assert_eq!(skus(&searcher, "+title:rust +title:language"), vec!["B-003"]);
    assert_eq!(
        skus(&searcher, "(elixir OR cooking) AND title:programming"),
        vec!["B-002"]
    );
    assert_eq!(skus(&searcher, "title:(cast iron)"), vec!["K-100"]);
}

#[test]
fn test_negation_only_and_match_all() {
    let searcher = catalog();
    assert_eq!(skus(&searcher, "*").len(), 5);
    assert_eq!(skus(&searcher, "-rust"), vec!["B-002", "K-100"]);
    let hits = searcher.search_str("-rust", 10).unwrap();
    assert!(hits.iter().all(|hit| hit.score == 0.0));
}

#[test]
fn test_phrases() {
    let searcher = catalog();
    assert_eq!(skus(&searcher, "\"rust programming\""), vec!["B-003"]);
    assert_eq!(skus(&searcher, "title:\"programming rust\""), Vec::<String>::new());
    assert_eq!(skus(&searcher, "body:\"cast iron\""), vec!["K-101"]);
    assert_eq!(skus(&searcher, "\"cast iron\""), vec!["K-100", "K-101"]);
}

#[test]
fn test_numeric_fields() {
    let searcher = catalog();
    assert_eq!(skus(&searcher, "balance:[-20 TO 0]"), vec!["B-001", "B-003", "K-100"]);
    assert_eq!(skus(&searcher, "balance:[* TO -6]"), vec!["B-001"]);
    assert_eq!(skus(&searcher, "balance:[10 TO *]"), vec!["B-002"]);
    assert_eq!(skus(&searcher, "price:[12.25 TO 30]"), vec!["B-002", "K-100"]);
    assert_eq!(skus(&searcher, "price:5"), vec!["K-101"]);
    assert_eq!(skus(&searcher, "stock:3"), vec!["B-001", "K-101"]);
    assert_eq!(skus(&searcher, "balance:-5"), vec!["K-100"]);
}

#[test]
fn test_bytes_and_facets() {
    let searcher = catalog();
    assert_eq!(skus(&searcher, "digest:aGVsbG8="), vec!["B-001"]);
    assert_eq!(
        skus(&searcher, "category:/books"),
        vec!["B-001", "B-002", "B-003"]
    );
    assert_eq!(
        skus(&searcher, "category:/books/programming/rust"),
        vec!["B-001", "B-003"]
    );
    assert_eq!(skus(&searcher, "category:/featured"), vec!["B-003"]);
    assert!(skus(&searcher, "category:/book").is_empty());
}

#[test]
fn test_bare_facet_path() {
    let searcher = catalog();
    assert_eq!(skus(&searcher, "/books"), vec!["B-001", "B-002", "B-003"]);
    assert_eq!(skus(&searcher, "/featured AND rust"), vec!["B-003"]);
    assert!(skus(&searcher, "/garden").is_empty());
}

#[test]
fn test_json_paths() {
    let searcher = catalog();
    assert_eq!(skus(&searcher, "attrs.format:paperback"), vec!["B-001", "B-003"]);
    assert_eq!(skus(&searcher, "attrs.pages:340"), vec!["B-002"]);
    assert_eq!(skus(&searcher, "attrs.pages:340.0"), vec!["B-002"]);
    assert_eq!(skus(&searcher, "attrs.pages:3.4e2"), vec!["B-002"]);
    assert_eq!(skus(&searcher, "attrs.signed:true"), vec!["B-001"]);
    assert_eq!(skus(&searcher, "attrs.dims.height:23"), vec!["B-003"]);
    assert!(skus(&searcher, "attrs.format:ebook AND rust").is_empty());
}

#[test]
fn test_prefix_and_wildcard_patterns() {
    let searcher = catalog();
    assert_eq!(skus(&searcher, "title:prog*"), vec!["B-002", "B-003"]);
    assert_eq!(skus(&searcher, "title:Ru*"), vec!["B-001", "B-003", "K-101"]);
    assert_eq!(skus(&searcher, "title:r?st"), vec!["B-001", "B-003", "K-101"]);
    assert_eq!(skus(&searcher, "title:*ing"), vec!["B-002", "B-003", "K-100"]);
    assert_eq!(skus(&searcher, "sku:B-00*"), vec!["B-001", "B-002", "B-003"]);
    // raw fields keep their case
    assert!(skus(&searcher, "sku:b-00*").is_empty());
    assert_eq!(skus(&searcher, "attrs.format:paper*"), vec!["B-001", "B-003"]);
    assert_eq!(skus(&searcher, "attrs.format:e?ook"), vec!["B-002"]);
    assert_eq!(skus(&searcher, "cook* AND title:*iron"), vec!["K-100"]);

    // one constant score however many expansions a document holds
    let hits = searcher.search_str("title:*r*", 10).unwrap();
    assert!(hits.len() >= 4);
    assert!(hits.iter().all(|hit| hit.score == 1.0));
}

#[test]
fn test_fuzzy_matches() {
    let searcher = catalog();
    assert_eq!(skus(&searcher, "title:rusk~1"), vec!["B-001", "B-003", "K-101"]);
    assert_eq!(skus(&searcher, "title:elixr~"), vec!["B-002"]);
    assert!(skus(&searcher, "title:elixr~0").is_empty());
    assert_eq!(skus(&searcher, "attrs.format:ebok~1"), vec!["B-002"]);
    assert_eq!(skus(&searcher, "scillets~2"), vec!["K-100"]);
}

#[test]
fn test_exists() {
    let searcher = catalog();
    assert_eq!(skus(&searcher, "_exists_:digest"), vec!["B-001", "B-002"]);
    assert_eq!(skus(&searcher, "_exists_:attrs.signed"), vec!["B-001"]);
    assert_eq!(skus(&searcher, "_exists_:attrs.dims"), vec!["B-003"]);
    assert_eq!(
        skus(&searcher, "_exists_:attrs"),
        vec!["B-001", "B-002", "B-003", "K-100"]
    );
    // fast-only and indexed-only numeric fields
    assert_eq!(skus(&searcher, "balance:*").len(), 5);
    assert_eq!(skus(&searcher, "stock:*").len(), 5);
    assert_eq!(skus(&searcher, "-_exists_:digest"), vec!["B-003", "K-100", "K-101"]);
}

#[test]
fn test_multi_term_queries_skip_deleted_documents() {
    let index = Index::create_in_ram(catalog_schema()).unwrap();
    let mut writer = index.writer().unwrap();
    for json in CATALOG {
        writer
            .add_document(Document::from_json(index.schema(), json).unwrap())
            .unwrap();
    }
    writer.commit().unwrap();
    let sku = index.schema().field("sku").unwrap();
    writer.delete_documents(Term::from_field_text(sku, "B-001")).unwrap();
    writer.commit().unwrap();

    let searcher = index.searcher();
    assert_eq!(skus(&searcher, "title:ru*"), vec!["B-003", "K-101"]);
    assert_eq!(skus(&searcher, "title:rusk~"), vec!["B-003", "K-101"]);
    assert_eq!(skus(&searcher, "_exists_:digest"), vec!["B-002"]);
    assert_eq!(skus(&searcher, "price:*").len(), 4);
}

#[test]
fn test_boost_changes_order() {
    let searcher = catalog();
    let plain = searcher.search_str("elixir OR cooking", 10).unwrap();
    assert_eq!(plain.len(), 2);
    // equal scores tie-break on ordinal: Elixir (1) before Cast Iron (3)
    assert_eq!(plain[0].global_ordinal, 1);

    let boosted = searcher.search_str("elixir OR cooking^3", 10).unwrap();
    assert_eq!(boosted[0].global_ordinal, 3);
    assert!(boosted[0].score > boosted[1].score);
}

#[test]
fn test_facet_counts() {
    let searcher = catalog();
    let all = searcher.parse_query("*").unwrap();

    let top = searcher.facet_counts(&all, "category", "/").unwrap();
    assert_eq!(top.get("/books"), 3);
    assert_eq!(top.get("/kitchen"), 2);
    assert_eq!(top.get("/featured"), 1);
    assert_eq!(top.len(), 3);

    let programming = searcher
        .facet_counts(&all, "category", "/books/programming")
        .unwrap();
    let ordered: Vec<(String, u64)> = programming
        .top(10)
        .into_iter()
        .map(|(facet, count)| (facet.to_string(), count))
        .collect();
    assert_eq!(
        ordered,
        vec![
            ("/books/programming/rust".to_string(), 2),
            ("/books/programming/elixir".to_string(), 1)
        ]
    );

    let rust = searcher.parse_query("rust").unwrap();
    let kitchen = searcher.facet_counts(&rust, "category", "/kitchen").unwrap();
    assert_eq!(kitchen.get("/kitchen/care"), 1);
    assert_eq!(kitchen.get("/kitchen/cookware"), 0);
    assert_eq!(
        kitchen.iter().map(|(f, _)| f.clone()).collect::<Vec<Facet>>(),
        vec![Facet::from_path("/kitchen/care").unwrap()]
    );
}

#[test]
fn test_facet_counts_field_checks() {
    let searcher = catalog();
    let all = searcher.parse_query("*").unwrap();
    assert!(matches!(
        searcher.facet_counts(&all, "nope", "/"),
        Err(LoupeError::Query(QueryError::UnknownField(_)))
    ));
    assert!(matches!(
        searcher.facet_counts(&all, "title", "/"),
        Err(LoupeError::Query(QueryError::TypeMismatch { .. }))
    ));
}

#[test]
fn test_query_errors() {
    let searcher = catalog();
    assert_eq!(
        query_error(&searcher, "author:someone"),
        QueryError::UnknownField("author".to_string())
    );
    assert!(matches!(
        query_error(&searcher, "stock:[1 TO 5]"),
        QueryError::TypeMismatch { .. }
    ));
    assert!(matches!(
        query_error(&searcher, "stock:many"),
        QueryError::TypeMismatch { .. }
    ));
    assert!(matches!(
        query_error(&searcher, "category:books"),
        QueryError::TypeMismatch { .. }
    ));
    assert!(matches!(
        query_error(&searcher, "attrs:paperback"),
        QueryError::TypeMismatch { .. }
    ));
    assert!(matches!(
        query_error(&searcher, "title:(rust"),
        QueryError::Syntax { position: 11, .. }
    ));
    assert!(matches!(
        query_error(&searcher, "balance:[1 TO"),
        QueryError::Syntax { .. }
    ));
}

#[test]
fn test_count_matches_search() {
    let searcher = catalog();
    for query in [
        "rust",
        "-rust",
        "*",
        "category:/kitchen",
        "price:[0 TO 30]",
        "title:prog*",
        "rusk~ OR _exists_:digest",
    ] {
        let plan = searcher.parse_query(query).unwrap();
        assert_eq!(
            searcher.count(&plan).unwrap(),
            searcher.search(&plan, 100).unwrap().len() as u64,
            "{}",
            query
        );
    }
}
