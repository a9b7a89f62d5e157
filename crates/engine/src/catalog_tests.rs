// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::*;

fn tool(name: &str) -> Tool {
    Tool { name: name.to_string(), description: None, input_schema: json!({"type": "object"}) }
}

#[test]
fn tools_are_prefixed_with_backend_name() {
    let catalog = Catalog::build(vec![
        ("fs".to_string(), vec![tool("read_file"), tool("write_file")]),
        ("github".to_string(), vec![tool("create_issue")]),
    ]);

    let names: Vec<&str> = catalog.tools().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["fs_read_file", "fs_write_file", "github_create_issue"]);
}

#[test]
fn resolve_routes_back_to_original_name() {
    let catalog = Catalog::build(vec![("fs".to_string(), vec![tool("read_file")])]);

    let route = catalog.resolve("fs_read_file").unwrap();
    assert_eq!(route.backend, "fs");
    assert_eq!(route.tool, "read_file");

    assert!(catalog.resolve("fs_unknown").is_none());
    assert!(catalog.resolve("read_file").is_none());
}

#[test]
fn order_is_stable_regardless_of_input_order() {
    let a = Catalog::build(vec![
        ("zeta".to_string(), vec![tool("one")]),
        ("alpha".to_string(), vec![tool("two")]),
    ]);
    let b = Catalog::build(vec![
        ("alpha".to_string(), vec![tool("two")]),
        ("zeta".to_string(), vec![tool("one")]),
    ]);

    let names_a: Vec<&str> = a.tools().iter().map(|t| t.name.as_str()).collect();
    let names_b: Vec<&str> = b.tools().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names_a, names_b);
    assert_eq!(names_a, vec!["alpha_two", "zeta_one"]);
}

#[test]
fn empty_catalog() {
    let catalog = Catalog::build(vec![]);
    assert!(catalog.is_empty());
    assert_eq!(catalog.len(), 0);
    assert!(catalog.summaries().is_empty());
}

#[test]
fn summaries_carry_backend_names() {
    let catalog = Catalog::build(vec![
        ("fs".to_string(), vec![tool("read_file")]),
        ("notes".to_string(), vec![tool("search")]),
    ]);

    let summaries = catalog.summaries();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].name, "fs_read_file");
    assert_eq!(summaries[0].backend, "fs");
    assert_eq!(summaries[1].name, "notes_search");
    assert_eq!(summaries[1].backend, "notes");
}

#[test]
fn tool_metadata_survives_prefixing() {
    let original = Tool {
        name: "read_file".to_string(),
        description: Some("Read a file from disk".to_string()),
        input_schema: json!({"type": "object", "required": ["path"]}),
    };
    let catalog = Catalog::build(vec![("fs".to_string(), vec![original])]);

    let merged = &catalog.tools()[0];
    assert_eq!(merged.description.as_deref(), Some("Read a file from disk"));
    assert_eq!(merged.input_schema["required"][0], json!("path"));
}
