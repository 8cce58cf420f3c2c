use std::collections::HashMap;

use crate::utils::NetworkError;

/// GraphQL operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// One canonical typed-document representation of a GraphQL operation
#[derive(Debug, Clone, PartialEq)]
pub struct GraphQlDocument {
    pub name: Option<String>,
    pub kind: OperationKind,
    pub body: String,
}

/// A request for an operation: a symbolic reference into generated code,
/// or a raw query string template
#[derive(Debug, Clone)]
pub enum Operation {
    Named(String),
    Raw(String),
}

/// Export table of one code-generation source
#[derive(Debug, Default)]
pub struct OperationRegistry {
    operations: HashMap<String, GraphQlDocument>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, doc: GraphQlDocument) {
        if let Some(name) = &doc.name {
            self.operations.insert(name.clone(), doc);
        }
    }

    pub fn get(&self, name: &str) -> Option<&GraphQlDocument> {
        self.operations.get(name)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Resolves operations against two independently generated sources,
/// primary first, as a plain ordered fallback.
#[derive(Debug, Default)]
pub struct DocumentResolver {
    primary: OperationRegistry,
    secondary: OperationRegistry,
}

impl DocumentResolver {
    pub fn new(primary: OperationRegistry, secondary: OperationRegistry) -> Self {
        Self { primary, secondary }
    }

    /// Resolve a named or raw operation to one canonical document.
    ///
    /// Named references look up the primary export table, then the
    /// secondary. Raw templates are parsed; a template naming an operation
    /// known to either source resolves to that source's typed document.
    /// Anything unrecognized is a developer-time error: the generated
    /// artifacts are out of date.
    pub fn resolve(&self, operation: &Operation) -> Result<GraphQlDocument, NetworkError> {
        match operation {
            Operation::Named(name) => self
                .lookup(name)
                .cloned()
                .ok_or_else(|| NetworkError::UnknownOperation(name.clone())),
            Operation::Raw(raw) => {
                let parsed = parse_document(raw).ok_or_else(|| {
                    NetworkError::UnknownOperation(preview(raw))
                })?;
                // Prefer the generated document when the template names a
                // known operation, so callers get the typed representation
                if let Some(name) = &parsed.name {
                    if let Some(doc) = self.lookup(name) {
                        return Ok(doc.clone());
                    }
                }
                Ok(parsed)
            }
        }
    }

    fn lookup(&self, name: &str) -> Option<&GraphQlDocument> {
        self.primary.get(name).or_else(|| self.secondary.get(name))
    }
}

/// Recognize a raw template as a GraphQL document and classify it
pub fn parse_document(raw: &str) -> Option<GraphQlDocument> {
    let trimmed = raw.trim();
    let (kind, rest) = if let Some(rest) = trimmed.strip_prefix("query") {
        (OperationKind::Query, rest)
    } else if let Some(rest) = trimmed.strip_prefix("mutation") {
        (OperationKind::Mutation, rest)
    } else if let Some(rest) = trimmed.strip_prefix("subscription") {
        (OperationKind::Subscription, rest)
    } else if trimmed.starts_with('{') {
        // Anonymous shorthand query
        return Some(GraphQlDocument {
            name: None,
            kind: OperationKind::Query,
            body: trimmed.to_string(),
        });
    } else {
        return None;
    };

    // The keyword must be a whole token followed by a name or selection set
    if !rest.starts_with(|c: char| c.is_whitespace() || c == '{' || c == '(') {
        return None;
    }
    if !trimmed.contains('{') {
        return None;
    }

    let name = rest
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(' || c == '{')
        .next()
        .filter(|s| !s.is_empty())
        .map(String::from);

    Some(GraphQlDocument {
        name,
        kind,
        body: trimmed.to_string(),
    })
}

fn preview(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() > 60 {
        let head: String = trimmed.chars().take(60).collect();
        format!("{head}...")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str, kind: OperationKind) -> GraphQlDocument {
        GraphQlDocument {
            name: Some(name.to_string()),
            kind,
            body: format!("query {name} {{ field }}"),
        }
    }

    fn resolver() -> DocumentResolver {
        let mut primary = OperationRegistry::new();
        primary.register(doc("GetUser", OperationKind::Query));
        primary.register(doc("Shared", OperationKind::Query));
        let mut secondary = OperationRegistry::new();
        secondary.register(doc("LibraryOp", OperationKind::Mutation));
        secondary.register(GraphQlDocument {
            name: Some("Shared".to_string()),
            kind: OperationKind::Query,
            body: "query Shared { other }".to_string(),
        });
        DocumentResolver::new(primary, secondary)
    }

    #[test]
    fn test_named_lookup_prefers_primary() {
        let resolver = resolver();
        let doc = resolver
            .resolve(&Operation::Named("Shared".to_string()))
            .unwrap();
        // Primary wins when both sources export the same name
        assert_eq!(doc.body, "query Shared { field }");
    }

    #[test]
    fn test_named_lookup_falls_back_to_secondary() {
        let resolver = resolver();
        let doc = resolver
            .resolve(&Operation::Named("LibraryOp".to_string()))
            .unwrap();
        assert_eq!(doc.kind, OperationKind::Mutation);
    }

    #[test]
    fn test_unknown_named_operation_is_hard_error() {
        let resolver = resolver();
        let err = resolver
            .resolve(&Operation::Named("Missing".to_string()))
            .unwrap_err();
        assert!(matches!(err, NetworkError::UnknownOperation(_)));
        assert!(err.to_string().contains("Regenerate"));
    }

    #[test]
    fn test_raw_template_parsing() {
        let resolver = resolver();
        let doc = resolver
            .resolve(&Operation::Raw("mutation Save($x: Int!) { save(x: $x) }".into()))
            .unwrap();
        assert_eq!(doc.kind, OperationKind::Mutation);
        assert_eq!(doc.name.as_deref(), Some("Save"));

        let doc = resolver
            .resolve(&Operation::Raw("{ deviceId }".into()))
            .unwrap();
        assert_eq!(doc.kind, OperationKind::Query);
        assert_eq!(doc.name, None);
    }

    #[test]
    fn test_raw_template_resolves_to_generated_document() {
        let resolver = resolver();
        let doc = resolver
            .resolve(&Operation::Raw("query GetUser { anything }".into()))
            .unwrap();
        // The generated typed document wins over the ad-hoc template
        assert_eq!(doc.body, "query GetUser { field }");
    }

    #[test]
    fn test_unparseable_template_is_hard_error() {
        let resolver = resolver();
        let err = resolver
            .resolve(&Operation::Raw("SELECT * FROM users".into()))
            .unwrap_err();
        assert!(matches!(err, NetworkError::UnknownOperation(_)));

        // A keyword prefix without a document body is not recognized either
        assert!(parse_document("queryish nonsense").is_none());
        assert!(parse_document("query NoBody").is_none());
    }

    #[test]
    fn test_unrecognized_multibyte_template_is_an_error_not_a_panic() {
        let resolver = resolver();
        // Long enough to truncate, with non-ASCII text straddling the cut
        let raw = format!("{}ααααααα", "a".repeat(59));
        let err = resolver.resolve(&Operation::Raw(raw)).unwrap_err();
        assert!(matches!(err, NetworkError::UnknownOperation(_)));
        assert!(err.to_string().contains("..."));
    }
}
