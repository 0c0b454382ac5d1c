//! Legal content-type transitions.
//!
//! The graph is an adjacency table over the catalog: each edge is labelled with
//! the atomic [`UpdateAction`] that moves an item from one shape to another (or
//! keeps it in place). It is validated once at construction, so lookups never
//! have to resolve ambiguity at runtime.

use crate::content_type::ContentType;
use crate::error::{Result, VaultError};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Atomic shape mutation requested by an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
    EditMetadata,
    AddPassword,
    RemovePassword,
    AddNote,
    RemoveNote,
    AddOneTimeCode,
    RemoveOneTimeCode,
    RemovePasswordAndNote,
    AddMetadataDescription,
    RemoveMetadataDescription,
}

impl fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdateAction::EditMetadata => "edit-metadata",
            UpdateAction::AddPassword => "add-password",
            UpdateAction::RemovePassword => "remove-password",
            UpdateAction::AddNote => "add-note",
            UpdateAction::RemoveNote => "remove-note",
            UpdateAction::AddOneTimeCode => "add-one-time-code",
            UpdateAction::RemoveOneTimeCode => "remove-one-time-code",
            UpdateAction::RemovePasswordAndNote => "remove-password-and-note",
            UpdateAction::AddMetadataDescription => "add-metadata-description",
            UpdateAction::RemoveMetadataDescription => "remove-metadata-description",
        };
        f.write_str(name)
    }
}

/// Errors detected while building a transition graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Ambiguous edge: {from} has more than one target for {action}")]
    AmbiguousEdge {
        from: ContentType,
        action: UpdateAction,
    },
    #[error("Edge {from} --{action}--> {target} crosses schema versions")]
    CrossSchemaEdge {
        from: ContentType,
        target: ContentType,
        action: UpdateAction,
    },
    #[error("Content type {0} has no outgoing edges")]
    MissingVertex(ContentType),
}

use ContentType::*;
use UpdateAction::*;

/// Edge table of the catalog, one family per schema version.
pub const STANDARD_EDGES: &[(ContentType, UpdateAction, ContentType)] = &[
    (PasswordString, EditMetadata, PasswordString),
    (PasswordString, AddPassword, PasswordString),
    (PasswordString, RemovePassword, PasswordString),
    (PasswordString, AddMetadataDescription, PasswordString),
    (PasswordString, RemoveMetadataDescription, PasswordString),
    (V5PasswordString, EditMetadata, V5PasswordString),
    (V5PasswordString, AddPassword, V5PasswordString),
    (V5PasswordString, RemovePassword, V5PasswordString),
    (V5PasswordString, AddMetadataDescription, V5PasswordString),
    (V5PasswordString, RemoveMetadataDescription, V5PasswordString),
    (V5PasswordString, AddOneTimeCode, V5DefaultWithTotp),
    (V5PasswordString, AddNote, V5Default),
    (PasswordAndDescription, EditMetadata, PasswordAndDescription),
    (PasswordAndDescription, AddNote, PasswordAndDescription),
    (PasswordAndDescription, RemoveNote, PasswordAndDescription),
    (PasswordAndDescription, AddPassword, PasswordAndDescription),
    (PasswordAndDescription, RemovePassword, PasswordAndDescription),
    (PasswordAndDescription, AddOneTimeCode, PasswordDescriptionTotp),
    (V5Default, EditMetadata, V5Default),
    (V5Default, AddNote, V5Default),
    (V5Default, RemoveNote, V5Default),
    (V5Default, AddPassword, V5Default),
    (V5Default, RemovePassword, V5Default),
    (V5Default, AddMetadataDescription, V5Default),
    (V5Default, RemoveMetadataDescription, V5Default),
    (V5Default, AddOneTimeCode, V5DefaultWithTotp),
    (PasswordDescriptionTotp, EditMetadata, PasswordDescriptionTotp),
    (PasswordDescriptionTotp, AddNote, PasswordDescriptionTotp),
    (PasswordDescriptionTotp, RemoveNote, PasswordDescriptionTotp),
    (PasswordDescriptionTotp, AddOneTimeCode, PasswordDescriptionTotp),
    (PasswordDescriptionTotp, RemoveOneTimeCode, PasswordAndDescription),
    (PasswordDescriptionTotp, AddPassword, PasswordDescriptionTotp),
    (PasswordDescriptionTotp, RemovePassword, PasswordDescriptionTotp),
    (PasswordDescriptionTotp, RemovePasswordAndNote, Totp),
    (V5DefaultWithTotp, EditMetadata, V5DefaultWithTotp),
    (V5DefaultWithTotp, AddNote, V5DefaultWithTotp),
    (V5DefaultWithTotp, RemoveNote, V5DefaultWithTotp),
    (V5DefaultWithTotp, AddOneTimeCode, V5DefaultWithTotp),
    (V5DefaultWithTotp, RemoveOneTimeCode, V5Default),
    (V5DefaultWithTotp, AddPassword, V5DefaultWithTotp),
    (V5DefaultWithTotp, RemovePassword, V5DefaultWithTotp),
    (V5DefaultWithTotp, RemovePasswordAndNote, V5TotpStandalone),
    (V5DefaultWithTotp, AddMetadataDescription, V5DefaultWithTotp),
    (V5DefaultWithTotp, RemoveMetadataDescription, V5DefaultWithTotp),
    (Totp, EditMetadata, Totp),
    (Totp, AddOneTimeCode, Totp),
    (Totp, RemoveOneTimeCode, Totp),
    (Totp, AddNote, PasswordDescriptionTotp),
    (Totp, AddPassword, PasswordDescriptionTotp),
    (V5TotpStandalone, EditMetadata, V5TotpStandalone),
    (V5TotpStandalone, AddOneTimeCode, V5TotpStandalone),
    (V5TotpStandalone, RemoveOneTimeCode, V5TotpStandalone),
    (V5TotpStandalone, AddNote, V5DefaultWithTotp),
    (V5TotpStandalone, AddPassword, V5DefaultWithTotp),
    (V5TotpStandalone, AddMetadataDescription, V5TotpStandalone),
    (V5TotpStandalone, RemoveMetadataDescription, V5TotpStandalone),
];

lazy_static! {
    static ref STANDARD_GRAPH: TransitionGraph = TransitionGraph::from_edges(STANDARD_EDGES)
        .expect("standard edge table is unambiguous and covers the catalog");
}

/// Directed graph of legal content-type transitions.
#[derive(Debug, Clone)]
pub struct TransitionGraph {
    adjacency: BTreeMap<ContentType, BTreeMap<UpdateAction, ContentType>>,
}

impl TransitionGraph {
    /// The process-wide graph built from [`STANDARD_EDGES`].
    pub fn standard() -> &'static TransitionGraph {
        &STANDARD_GRAPH
    }

    /// Build a graph from an edge list, rejecting inconsistent tables.
    pub fn from_edges(
        edges: &[(ContentType, UpdateAction, ContentType)],
    ) -> std::result::Result<Self, GraphError> {
        let mut adjacency: BTreeMap<ContentType, BTreeMap<UpdateAction, ContentType>> =
            BTreeMap::new();

        for &(source, action, target) in edges {
            if source.schema_version() != target.schema_version() {
                return Err(GraphError::CrossSchemaEdge {
                    from: source,
                    target,
                    action,
                });
            }
            let outgoing = adjacency.entry(source).or_default();
            if outgoing.insert(action, target).is_some() {
                return Err(GraphError::AmbiguousEdge {
                    from: source,
                    action,
                });
            }
        }

        if let Some(missing) = ContentType::ALL
            .iter()
            .find(|ct| !adjacency.contains_key(*ct))
        {
            return Err(GraphError::MissingVertex(*missing));
        }

        Ok(Self { adjacency })
    }

    /// Whether `action` has an edge out of `content_type`.
    pub fn allows(&self, content_type: ContentType, action: UpdateAction) -> bool {
        self.target(content_type, action).is_some()
    }

    /// Content type reached by applying `action`, if legal.
    pub fn target(&self, content_type: ContentType, action: UpdateAction) -> Option<ContentType> {
        self.adjacency
            .get(&content_type)
            .and_then(|edges| edges.get(&action))
            .copied()
    }

    /// Apply `action` to `content_type`, failing with `IllegalTransition`.
    pub fn transition(&self, content_type: ContentType, action: UpdateAction) -> Result<ContentType> {
        self.target(content_type, action)
            .ok_or_else(|| VaultError::IllegalTransition {
                content_type: content_type.slug().to_string(),
                action,
            })
    }

    /// Legal actions from `content_type` in stable order.
    pub fn actions(&self, content_type: ContentType) -> Vec<UpdateAction> {
        self.adjacency
            .get(&content_type)
            .map(|edges| edges.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Outgoing edges of `content_type` as (action, target) pairs.
    pub fn edges(&self, content_type: ContentType) -> Vec<(UpdateAction, ContentType)> {
        self.adjacency
            .get(&content_type)
            .map(|edges| edges.iter().map(|(a, t)| (*a, *t)).collect())
            .unwrap_or_default()
    }

    /// Slug form of [`allows`](Self::allows). Unknown slugs are never legal.
    pub fn is_legal(&self, slug: &str, action: UpdateAction) -> bool {
        ContentType::from_slug(slug)
            .map(|ct| self.allows(ct, action))
            .unwrap_or(false)
    }

    /// Slug form of [`transition`](Self::transition).
    pub fn apply(&self, slug: &str, action: UpdateAction) -> Result<&'static str> {
        let current = ContentType::from_slug(slug)?;
        self.transition(current, action).map(|ct| ct.slug())
    }
}

/// Substitute `RemovePasswordAndNote` when an edit leaves both password and
/// note blank on a shape that only defines the combined edge.
///
/// `password_blank` and `note_blank` describe the secret as it will be after
/// the edit.
pub fn merge_action(
    graph: &TransitionGraph,
    current: ContentType,
    action: UpdateAction,
    password_blank: bool,
    note_blank: bool,
) -> UpdateAction {
    let removes_one = matches!(action, RemovePassword | RemoveNote);
    if removes_one
        && password_blank
        && note_blank
        && graph.allows(current, RemovePasswordAndNote)
    {
        debug!(
            content_type = %current,
            %action,
            "merged into remove-password-and-note"
        );
        return RemovePasswordAndNote;
    }
    action
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_graph_builds() {
        let graph = TransitionGraph::standard();
        for ct in ContentType::ALL {
            assert!(!graph.actions(ct).is_empty(), "{ct} has no actions");
        }
    }

    #[test]
    fn test_apply_is_deterministic() {
        let graph = TransitionGraph::standard();
        for ct in ContentType::ALL {
            for (action, target) in graph.edges(ct) {
                for _ in 0..3 {
                    assert_eq!(graph.apply(ct.slug(), action).unwrap(), target.slug());
                }
            }
        }
    }

    #[test]
    fn test_adding_totp_moves_to_bundle() {
        let graph = TransitionGraph::standard();
        assert_eq!(
            graph.apply("v5-default", AddOneTimeCode).unwrap(),
            "v5-default-with-totp"
        );
        assert_eq!(
            graph.apply("password-and-description", AddOneTimeCode).unwrap(),
            "password-description-totp"
        );
        assert_eq!(
            graph.apply("v5-totp-standalone", AddPassword).unwrap(),
            "v5-default-with-totp"
        );
    }

    #[test]
    fn test_v5_password_string_grows_into_default_types() {
        let graph = TransitionGraph::standard();
        assert_eq!(
            graph.apply("v5-password-string", AddNote).unwrap(),
            "v5-default"
        );
        assert_eq!(
            graph.apply("v5-password-string", AddOneTimeCode).unwrap(),
            "v5-default-with-totp"
        );
        assert!(!graph.is_legal("v5-password-string", RemoveNote));
    }

    #[test]
    fn test_v5_types_edit_metadata_description_in_place() {
        let graph = TransitionGraph::standard();
        for ct in [V5PasswordString, V5Default, V5DefaultWithTotp, V5TotpStandalone] {
            for action in [AddMetadataDescription, RemoveMetadataDescription] {
                assert_eq!(graph.transition(ct, action).unwrap(), ct, "{ct} {action}");
            }
        }
        assert!(!graph.allows(PasswordAndDescription, AddMetadataDescription));
        assert!(!graph.allows(PasswordDescriptionTotp, RemoveMetadataDescription));
    }

    #[test]
    fn test_illegal_transitions() {
        let graph = TransitionGraph::standard();
        assert!(!graph.is_legal("v5-default", RemovePasswordAndNote));
        assert!(!graph.is_legal("password-string", AddNote));
        assert!(!graph.is_legal("totp", AddMetadataDescription));
        assert!(!graph.is_legal("no-such-type", EditMetadata));

        let err = graph.apply("v5-default", RemovePasswordAndNote).unwrap_err();
        assert!(matches!(err, VaultError::IllegalTransition { .. }));
    }

    #[test]
    fn test_transitions_stay_within_schema_version() {
        let graph = TransitionGraph::standard();
        for ct in ContentType::ALL {
            for (_, target) in graph.edges(ct) {
                assert_eq!(ct.schema_version(), target.schema_version());
            }
        }
    }

    #[test]
    fn test_ambiguous_table_is_rejected() {
        let mut edges = STANDARD_EDGES.to_vec();
        edges.push((V5Default, AddOneTimeCode, V5Default));
        assert_eq!(
            TransitionGraph::from_edges(&edges).unwrap_err(),
            GraphError::AmbiguousEdge {
                from: V5Default,
                action: AddOneTimeCode
            }
        );
    }

    #[test]
    fn test_cross_schema_table_is_rejected() {
        let mut edges = STANDARD_EDGES.to_vec();
        edges.push((Totp, RemovePassword, V5TotpStandalone));
        assert!(matches!(
            TransitionGraph::from_edges(&edges),
            Err(GraphError::CrossSchemaEdge { .. })
        ));
    }

    #[test]
    fn test_incomplete_table_is_rejected() {
        let edges: Vec<_> = STANDARD_EDGES
            .iter()
            .copied()
            .filter(|(source, _, _)| *source != Totp)
            .collect();
        assert_eq!(
            TransitionGraph::from_edges(&edges).unwrap_err(),
            GraphError::MissingVertex(Totp)
        );
    }

    #[test]
    fn test_merge_action() {
        let graph = TransitionGraph::standard();

        // both blank on a bundle type
        assert_eq!(
            merge_action(graph, V5DefaultWithTotp, RemovePassword, true, true),
            RemovePasswordAndNote
        );
        assert_eq!(
            merge_action(graph, PasswordDescriptionTotp, RemoveNote, true, true),
            RemovePasswordAndNote
        );

        // note still filled
        assert_eq!(
            merge_action(graph, V5DefaultWithTotp, RemovePassword, true, false),
            RemovePassword
        );

        // no combined edge without a one-time code
        assert_eq!(
            merge_action(graph, V5Default, RemovePassword, true, true),
            RemovePassword
        );

        // unrelated action
        assert_eq!(
            merge_action(graph, V5DefaultWithTotp, EditMetadata, true, true),
            EditMetadata
        );
    }
}
