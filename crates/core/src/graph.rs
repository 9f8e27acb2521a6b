use crate::error::StorageError;
use crate::models::{DocType, EmbeddedChunk};
use crate::traits::GraphStore;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

/// Page node content is truncated to this many characters.
pub const PAGE_CONTENT_LIMIT: usize = 5_000;

pub type Properties = BTreeMap<String, Value>;

/// A node identified by label and natural key.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRef {
    pub label: String,
    pub key: Properties,
}

impl NodeRef {
    pub fn new(label: &str, key: impl IntoIterator<Item = (&'static str, Value)>) -> Self {
        Self {
            label: label.to_string(),
            key: key
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }

    /// Stable identity used by stores that key nodes in memory.
    pub fn identity(&self) -> String {
        let key: Map<String, Value> = self.key.clone().into_iter().collect();
        format!("{}{}", self.label, Value::Object(key))
    }
}

/// One upsert against the graph. Statements are idempotent: merging the
/// same key twice updates properties without duplicating nodes or edges.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphStatement {
    MergeNode {
        node: NodeRef,
        properties: Properties,
    },
    MergeEdge {
        from: NodeRef,
        relationship: String,
        to: NodeRef,
    },
}

impl GraphStatement {
    pub fn node(node: NodeRef) -> Self {
        Self::MergeNode {
            node,
            properties: Properties::new(),
        }
    }

    pub fn node_with(node: NodeRef, properties: impl IntoIterator<Item = (&'static str, Value)>) -> Self {
        Self::MergeNode {
            node,
            properties: properties
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }

    pub fn edge(from: &NodeRef, relationship: &str, to: &NodeRef) -> Self {
        Self::MergeEdge {
            from: from.clone(),
            relationship: relationship.to_string(),
            to: to.clone(),
        }
    }

    /// Renders a parametrised Cypher statement and its parameters.
    pub fn to_cypher(&self) -> (String, Value) {
        let mut parameters = Map::new();
        match self {
            Self::MergeNode { node, properties } => {
                let pattern = key_pattern(&node.key, "k", &mut parameters);
                let mut statement = format!("MERGE (n:{} {{{pattern}}})", node.label);
                if !properties.is_empty() {
                    statement.push_str(" SET n += $props");
                    let props: Map<String, Value> = properties.clone().into_iter().collect();
                    parameters.insert("props".to_string(), Value::Object(props));
                }
                (statement, Value::Object(parameters))
            }
            Self::MergeEdge {
                from,
                relationship,
                to,
            } => {
                let from_pattern = key_pattern(&from.key, "a", &mut parameters);
                let to_pattern = key_pattern(&to.key, "b", &mut parameters);
                let statement = format!(
                    "MATCH (a:{} {{{from_pattern}}}) MATCH (b:{} {{{to_pattern}}}) MERGE (a)-[:{relationship}]->(b)",
                    from.label, to.label
                );
                (statement, Value::Object(parameters))
            }
        }
    }
}

fn key_pattern(key: &Properties, prefix: &str, parameters: &mut Map<String, Value>) -> String {
    key.iter()
        .map(|(name, value)| {
            let parameter = format!("{prefix}_{name}");
            parameters.insert(parameter.clone(), value.clone());
            format!("{name}: ${parameter}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphSchemaKind {
    Request,
    Response,
}

impl GraphSchemaKind {
    /// Picks the schema for a document tag. Anything other than `response`
    /// falls back to the request schema; the flag reports the fallback.
    pub fn resolve(doc_type: Option<&DocType>) -> (Self, bool) {
        match doc_type {
            Some(DocType::Request) => (Self::Request, false),
            Some(DocType::Response) => (Self::Response, false),
            Some(DocType::Other(_)) | None => (Self::Request, true),
        }
    }

    pub fn schema(self) -> &'static dyn GraphSchema {
        match self {
            Self::Request => &RequestGraphSchema,
            Self::Response => &ResponseGraphSchema,
        }
    }
}

impl fmt::Display for GraphSchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => f.write_str("request"),
            Self::Response => f.write_str("response"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphPlan {
    pub statements: Vec<GraphStatement>,
    pub nodes_created: usize,
}

pub trait GraphSchema: Send + Sync {
    fn kind(&self) -> GraphSchemaKind;

    fn plan(&self, document_id: &str, chunks: &[EmbeddedChunk]) -> GraphPlan;
}

/// Values shared by both schemas, read from the first chunk.
struct DocumentFacts {
    doc_name: String,
    doc_type: String,
    location: Option<String>,
    year: Option<i32>,
}

impl DocumentFacts {
    fn from_chunks(document_id: &str, chunks: &[EmbeddedChunk]) -> Self {
        let metadata = chunks.first().map(|first| &first.chunk.metadata);
        Self {
            doc_name: metadata
                .and_then(|metadata| metadata.document_name.clone())
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| document_id.to_string()),
            doc_type: metadata
                .and_then(|metadata| metadata.doc_type.as_ref())
                .map(|doc_type| doc_type.to_string())
                .unwrap_or_default(),
            location: metadata
                .and_then(|metadata| metadata.location.clone())
                .filter(|location| !location.trim().is_empty()),
            year: metadata.and_then(|metadata| metadata.year),
        }
    }

    fn rfp_name(&self) -> Option<String> {
        let location = self.location.as_ref()?;
        let year = self.year?.to_string();
        let short_year = &year[year.len().saturating_sub(2)..];
        Some(format!("{location} RFP {short_year}"))
    }
}

fn link_both_ways(
    statements: &mut Vec<GraphStatement>,
    parent: &NodeRef,
    down: &str,
    child: &NodeRef,
    up: &str,
) {
    statements.push(GraphStatement::edge(parent, down, child));
    statements.push(GraphStatement::edge(child, up, parent));
}

/// Document → Page → Chunk statements shared by both schemas. Returns the
/// number of page and chunk nodes.
fn plan_pages_and_chunks(
    statements: &mut Vec<GraphStatement>,
    document: &NodeRef,
    doc_name: &str,
    chunk_label: &str,
    chunks: &[EmbeddedChunk],
) -> usize {
    let mut pages: BTreeMap<u32, Vec<&EmbeddedChunk>> = BTreeMap::new();
    for chunk in chunks {
        pages.entry(chunk.chunk.page_number).or_default().push(chunk);
    }

    let mut nodes = 0;
    for (page_number, page_chunks) in &pages {
        let content = page_chunks
            .iter()
            .map(|chunk| chunk.chunk.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let content: String = content.chars().take(PAGE_CONTENT_LIMIT).collect();

        let page = NodeRef::new(
            "Page",
            [("doc_name", json!(doc_name)), ("page_number", json!(page_number))],
        );
        statements.push(GraphStatement::node_with(
            page.clone(),
            [("content", json!(content))],
        ));
        link_both_ways(statements, document, "HAS_PAGE", &page, "HAS_DOCUMENT");
        nodes += 1;

        for chunk in page_chunks {
            let node = NodeRef::new(chunk_label, [("chunk_id", json!(chunk.chunk.chunk_id))]);
            statements.push(GraphStatement::node_with(
                node.clone(),
                [
                    ("text", json!(chunk.chunk.content)),
                    ("embedding", json!(chunk.embedding)),
                    ("doc_name", json!(doc_name)),
                    ("page_number", json!(page_number)),
                    ("chunk_index", json!(chunk.chunk.chunk_index)),
                ],
            ));
            link_both_ways(statements, &page, "HAS_CHUNK", &node, "HAS_PAGE");
            nodes += 1;
        }
    }

    nodes
}

/// Location, Year, Rfp, Document, Page and RequestChunk nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestGraphSchema;

impl GraphSchema for RequestGraphSchema {
    fn kind(&self) -> GraphSchemaKind {
        GraphSchemaKind::Request
    }

    fn plan(&self, document_id: &str, chunks: &[EmbeddedChunk]) -> GraphPlan {
        let facts = DocumentFacts::from_chunks(document_id, chunks);
        let mut statements = Vec::new();
        let mut nodes_created = 0;

        let location = facts.location.as_ref().map(|name| {
            NodeRef::new("Location", [("name", json!(name))])
        });
        let year = facts
            .year
            .map(|year| NodeRef::new("Year", [("year", json!(year.to_string()))]));
        for node in location.iter().chain(year.iter()) {
            statements.push(GraphStatement::node(node.clone()));
            nodes_created += 1;
        }

        let rfp_name = facts
            .rfp_name()
            .unwrap_or_else(|| format!("RFP {document_id}"));
        let rfp = NodeRef::new("Rfp", [("name", json!(rfp_name))]);
        statements.push(GraphStatement::node(rfp.clone()));
        nodes_created += 1;

        if let (Some(location), Some(year)) = (&location, &year) {
            statements.push(GraphStatement::edge(location, "HAS_RFP", &rfp));
            statements.push(GraphStatement::edge(&rfp, "IS_YEAR", year));
            statements.push(GraphStatement::edge(&rfp, "HAS_LOCATION", location));
        }

        let document = NodeRef::new("Document", [("name", json!(facts.doc_name))]);
        statements.push(GraphStatement::node_with(
            document.clone(),
            [
                ("source", json!(format!("{}.pdf", facts.doc_name))),
                ("doc_type", json!(facts.doc_type)),
            ],
        ));
        nodes_created += 1;
        link_both_ways(&mut statements, &rfp, "HAS_DOCUMENT", &document, "HAS_RFP");

        nodes_created += plan_pages_and_chunks(
            &mut statements,
            &document,
            &facts.doc_name,
            "RequestChunk",
            chunks,
        );

        GraphPlan {
            statements,
            nodes_created,
        }
    }
}

/// Document, Page and ResponseChunk nodes linked to an Rfp that a request
/// run normally created already.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseGraphSchema;

impl GraphSchema for ResponseGraphSchema {
    fn kind(&self) -> GraphSchemaKind {
        GraphSchemaKind::Response
    }

    fn plan(&self, document_id: &str, chunks: &[EmbeddedChunk]) -> GraphPlan {
        let facts = DocumentFacts::from_chunks(document_id, chunks);
        let mut statements = Vec::new();

        let rfp_name = facts
            .rfp_name()
            .unwrap_or_else(|| "Unknown RFP".to_string());
        let rfp = NodeRef::new("Rfp", [("name", json!(rfp_name))]);
        statements.push(GraphStatement::node(rfp.clone()));

        let document = NodeRef::new("Document", [("name", json!(facts.doc_name))]);
        statements.push(GraphStatement::node_with(
            document.clone(),
            [
                ("source", json!(format!("{}.docx", facts.doc_name))),
                ("doc_type", json!(facts.doc_type)),
            ],
        ));
        link_both_ways(&mut statements, &rfp, "HAS_DOCUMENT", &document, "HAS_RFP");

        let nodes_created = 1 + plan_pages_and_chunks(
            &mut statements,
            &document,
            &facts.doc_name,
            "ResponseChunk",
            chunks,
        );

        GraphPlan {
            statements,
            nodes_created,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphBuildReport {
    pub document_id: String,
    pub schema: GraphSchemaKind,
    pub defaulted_schema: bool,
    pub statements: usize,
    pub nodes_created: usize,
}

pub struct GraphProjectionBuilder<G> {
    store: G,
}

impl<G: GraphStore> GraphProjectionBuilder<G> {
    pub fn new(store: G) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &G {
        &self.store
    }

    pub async fn build(
        &self,
        document_id: &str,
        chunks: &[EmbeddedChunk],
    ) -> Result<GraphBuildReport, StorageError> {
        let Some(first) = chunks.first() else {
            return Err(StorageError::NotFound {
                container: "graph".to_string(),
                key: document_id.to_string(),
            });
        };

        let (kind, defaulted) = GraphSchemaKind::resolve(first.doc_type());
        if defaulted {
            warn!(
                document_id,
                doc_type = ?first.doc_type(),
                "unrecognised doc_type, using request graph schema"
            );
        }

        let plan = kind.schema().plan(document_id, chunks);
        self.store.run_all(&plan.statements).await?;

        info!(
            document_id,
            schema = %kind,
            nodes = plan.nodes_created,
            "graph projection complete"
        );

        Ok(GraphBuildReport {
            document_id: document_id.to_string(),
            schema: kind,
            defaulted_schema: defaulted,
            statements: plan.statements.len(),
            nodes_created: plan.nodes_created,
        })
    }
}
