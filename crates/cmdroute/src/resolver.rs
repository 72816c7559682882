use std::sync::Arc;

use cmdroute_args::{ArgumentSet, Cursor};

use crate::error::Failure;
use crate::tree::{ComponentTree, Node};

/// A command reachable from the input, with the number of tokens its path consumed.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub command: Arc<crate::tree::Command>,
    pub height: usize,
}

/// Result of a tree walk.
#[derive(Debug, Default)]
pub struct Search {
    candidates: Vec<Candidate>,
    /// Aliases of the deepest group reached.
    deepest: Vec<String>,
}

impl Search {
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn deepest_group(&self) -> &[String] {
        &self.deepest
    }

    /// The failure to report when no candidate was found.
    pub fn miss(&self, args: &ArgumentSet) -> Failure {
        if self.deepest.is_empty() {
            Failure::ComponentsNotFound {
                input: args.positional().first().cloned().unwrap_or_default(),
            }
        } else {
            Failure::RouteIncomplete {
                path: self.deepest.join(" "),
            }
        }
    }
}

/// Walk the tree depth-first and collect every command the leading tokens reach,
/// ordered by descending height, then registration order.
pub fn find(tree: &ComponentTree, args: &ArgumentSet) -> Search {
    let mut search = Search::default();
    let mut path = Vec::new();
    walk(tree.nodes(), args.cursor(), &mut path, &mut search);
    search.candidates.sort_by(|a, b| {
        b.height
            .cmp(&a.height)
            .then(a.command.order().cmp(&b.command.order()))
    });
    tracing::trace!(
        candidates = search.candidates.len(),
        deepest = %search.deepest.join(" "),
        "tree walk finished"
    );
    search
}

fn walk(nodes: &[Node], cursor: Cursor<'_>, path: &mut Vec<String>, search: &mut Search) {
    for node in nodes {
        let mut cursor = cursor;
        let Some(token) = cursor.next() else {
            return;
        };
        match node {
            Node::Command(command) if command.matches(token) => {
                search.candidates.push(Candidate {
                    command: Arc::clone(command),
                    height: cursor.position(),
                });
            }
            Node::Group(group) if group.matches(token) => {
                path.push(token.to_string());
                if path.len() > search.deepest.len() {
                    search.deepest = path.clone();
                }
                if let Some(default) = group.default_command() {
                    search.candidates.push(Candidate {
                        command: Arc::clone(default),
                        height: cursor.position(),
                    });
                }
                walk(group.children(), cursor, path, search);
                path.pop();
            }
            _ => {}
        }
    }
}
