//! In-process capability set for tools the remote provider does not offer.
//!
//! The author directory is handled locally: five tools over an in-memory
//! store. Their descriptors are merged into the discovery snapshot so the
//! planner sees one uniform registry.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use taskforge_core::tool::{FieldKind, FieldSpec, ToolDescriptor, ToolSchema};

use crate::protocol::ToolOutcome;

const AUTHOR_TOOLS: [&str; 5] = [
    "add_author",
    "get_authors",
    "get_author_by_name",
    "update_author",
    "delete_author",
];

/// A locally-stored author record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorRecord {
    pub name: String,
    pub bio: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_year: Option<i64>,
    pub nationality: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// The in-process tool handlers.
#[derive(Default)]
pub struct LocalToolset {
    authors: Mutex<Vec<AuthorRecord>>,
}

fn field(name: &str, kind: FieldKind, required: bool, description: &str) -> FieldSpec {
    FieldSpec {
        name: name.into(),
        kind,
        required,
        description: Some(description.into()),
    }
}

impl LocalToolset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a tool name belongs to the local capability set.
    pub fn handles(&self, name: &str) -> bool {
        AUTHOR_TOOLS
            .iter()
            .any(|t| t.eq_ignore_ascii_case(name))
    }

    /// Descriptors for every local tool, merged into discovery snapshots.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor {
                name: "add_author".into(),
                description: "Add a new author to the system".into(),
                schema: ToolSchema {
                    fields: vec![
                        field("name", FieldKind::String, true, "Author's full name"),
                        field("bio", FieldKind::String, false, "Author's biography (optional)"),
                        field(
                            "birth_year",
                            FieldKind::Integer,
                            false,
                            "Author's birth year (optional)",
                        ),
                        field(
                            "nationality",
                            FieldKind::String,
                            false,
                            "Author's nationality (optional)",
                        ),
                    ],
                },
            },
            ToolDescriptor {
                name: "get_authors".into(),
                description: "Get all authors in the system".into(),
                schema: ToolSchema::default(),
            },
            ToolDescriptor {
                name: "get_author_by_name".into(),
                description: "Get author details by name".into(),
                schema: ToolSchema {
                    fields: vec![field(
                        "name",
                        FieldKind::String,
                        true,
                        "Author's name to search for",
                    )],
                },
            },
            ToolDescriptor {
                name: "update_author".into(),
                description: "Update an existing author's information".into(),
                schema: ToolSchema {
                    fields: vec![
                        field("name", FieldKind::String, true, "Current author's name"),
                        field("new_name", FieldKind::String, false, "New author's name (optional)"),
                        field("bio", FieldKind::String, false, "Updated biography (optional)"),
                        field(
                            "birth_year",
                            FieldKind::Integer,
                            false,
                            "Updated birth year (optional)",
                        ),
                        field(
                            "nationality",
                            FieldKind::String,
                            false,
                            "Updated nationality (optional)",
                        ),
                    ],
                },
            },
            ToolDescriptor {
                name: "delete_author".into(),
                description: "Delete an author from the system".into(),
                schema: ToolSchema {
                    fields: vec![field(
                        "name",
                        FieldKind::String,
                        true,
                        "Author's name to delete",
                    )],
                },
            },
        ]
    }

    /// Execute a local tool. Arguments are already schema-validated.
    pub fn call(&self, name: &str, arguments: &Value) -> ToolOutcome {
        match name.to_ascii_lowercase().as_str() {
            "add_author" => self.add_author(arguments),
            "get_authors" => self.get_authors(),
            "get_author_by_name" => self.get_author_by_name(arguments),
            "update_author" => self.update_author(arguments),
            "delete_author" => self.delete_author(arguments),
            other => ToolOutcome::err(format!("Unknown local tool: {other}")),
        }
    }

    fn add_author(&self, arguments: &Value) -> ToolOutcome {
        let Some(name) = arguments["name"].as_str() else {
            return ToolOutcome::err("Author name is required");
        };

        let mut authors = self.authors.lock().expect("author store poisoned");
        if authors.iter().any(|a| a.name == name) {
            return ToolOutcome::err(format!("Author '{name}' already exists"));
        }

        let record = AuthorRecord {
            name: name.to_string(),
            bio: arguments["bio"].as_str().unwrap_or_default().to_string(),
            birth_year: arguments["birth_year"].as_i64(),
            nationality: arguments["nationality"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            created_at: Utc::now(),
            updated_at: None,
        };
        authors.push(record.clone());

        ToolOutcome::ok(json!({
            "success": true,
            "message": format!("Author '{name}' has been successfully added to the system"),
            "author": record,
        }))
    }

    fn get_authors(&self) -> ToolOutcome {
        let authors = self.authors.lock().expect("author store poisoned");
        ToolOutcome::ok(json!({
            "success": true,
            "authors": *authors,
            "count": authors.len(),
        }))
    }

    fn get_author_by_name(&self, arguments: &Value) -> ToolOutcome {
        let Some(name) = arguments["name"].as_str() else {
            return ToolOutcome::err("Author name is required");
        };

        let authors = self.authors.lock().expect("author store poisoned");
        match authors.iter().find(|a| a.name == name) {
            Some(author) => ToolOutcome::ok(json!({"success": true, "author": author})),
            None => ToolOutcome::err(format!("Author '{name}' not found")),
        }
    }

    fn update_author(&self, arguments: &Value) -> ToolOutcome {
        let Some(name) = arguments["name"].as_str() else {
            return ToolOutcome::err("Author name is required");
        };

        let mut authors = self.authors.lock().expect("author store poisoned");
        let Some(author) = authors.iter_mut().find(|a| a.name == name) else {
            return ToolOutcome::err(format!("Author '{name}' not found"));
        };

        if let Some(new_name) = arguments["new_name"].as_str() {
            author.name = new_name.to_string();
        }
        if let Some(bio) = arguments["bio"].as_str() {
            author.bio = bio.to_string();
        }
        if let Some(birth_year) = arguments["birth_year"].as_i64() {
            author.birth_year = Some(birth_year);
        }
        if let Some(nationality) = arguments["nationality"].as_str() {
            author.nationality = nationality.to_string();
        }
        author.updated_at = Some(Utc::now());

        ToolOutcome::ok(json!({
            "success": true,
            "message": format!("Author '{name}' has been successfully updated"),
            "author": author.clone(),
        }))
    }

    fn delete_author(&self, arguments: &Value) -> ToolOutcome {
        let Some(name) = arguments["name"].as_str() else {
            return ToolOutcome::err("Author name is required");
        };

        let mut authors = self.authors.lock().expect("author store poisoned");
        match authors.iter().position(|a| a.name == name) {
            Some(index) => {
                let deleted = authors.remove(index);
                ToolOutcome::ok(json!({
                    "success": true,
                    "message": format!("Author '{name}' has been successfully deleted"),
                    "deleted_author": deleted,
                }))
            }
            None => ToolOutcome::err(format!("Author '{name}' not found")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_only_author_tools() {
        let toolset = LocalToolset::new();
        assert!(toolset.handles("add_author"));
        assert!(toolset.handles("GET_AUTHORS"));
        assert!(!toolset.handles("add_book"));
    }

    #[test]
    fn descriptors_cover_capability_set() {
        let toolset = LocalToolset::new();
        let descriptors = toolset.descriptors();
        assert_eq!(descriptors.len(), AUTHOR_TOOLS.len());
        for name in AUTHOR_TOOLS {
            assert!(descriptors.iter().any(|d| d.name == name), "missing {name}");
        }
    }

    #[test]
    fn add_and_fetch_author() {
        let toolset = LocalToolset::new();
        let outcome = toolset.call(
            "add_author",
            &json!({"name": "Jane Smith", "nationality": "British"}),
        );
        assert!(outcome.success);

        let fetched = toolset.call("get_author_by_name", &json!({"name": "Jane Smith"}));
        assert!(fetched.success);
        assert_eq!(
            fetched.data.unwrap()["author"]["nationality"],
            json!("British")
        );
    }

    #[test]
    fn duplicate_author_is_rejected() {
        let toolset = LocalToolset::new();
        assert!(toolset.call("add_author", &json!({"name": "Jane"})).success);
        let second = toolset.call("add_author", &json!({"name": "Jane"}));
        assert!(!second.success);
        assert!(second.error.unwrap().contains("already exists"));
    }

    #[test]
    fn update_changes_fields() {
        let toolset = LocalToolset::new();
        toolset.call("add_author", &json!({"name": "Jane"}));
        let outcome = toolset.call(
            "update_author",
            &json!({"name": "Jane", "bio": "novelist", "birth_year": 1970}),
        );
        assert!(outcome.success);
        let author = &outcome.data.unwrap()["author"];
        assert_eq!(author["bio"], json!("novelist"));
        assert_eq!(author["birth_year"], json!(1970));
    }

    #[test]
    fn delete_removes_author() {
        let toolset = LocalToolset::new();
        toolset.call("add_author", &json!({"name": "Jane"}));
        assert!(toolset.call("delete_author", &json!({"name": "Jane"})).success);

        let listed = toolset.call("get_authors", &json!({}));
        assert_eq!(listed.data.unwrap()["count"], json!(0));
    }

    #[test]
    fn missing_author_is_an_error_outcome() {
        let toolset = LocalToolset::new();
        let outcome = toolset.call("get_author_by_name", &json!({"name": "Nobody"}));
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("not found"));
    }
}
