//! Business-activity classification
//!
//! The business activity in a feature-set header doubles as the handler
//! wiring declaration: `OrderPlaced Handler`, `order-repository Observer`,
//! `status StateObserver<draft_to_paid>`, and the File/Socket watcher
//! forms. Both the analyzer (event-graph pass) and the engine (handler
//! wiring) share this classification.

/// What a feature set's business activity declares it to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityKind {
    /// A plain business activity with no handler semantics.
    Plain,
    /// `<tag> Handler` — subscribes to the domain event `tag`.
    DomainHandler { tag: String },
    /// `<name>-repository Observer` — subscribes to RepositoryChanged.
    RepositoryObserver { repository: String },
    /// `<field> StateObserver[<from_to_to>]` — subscribes to
    /// StateTransition for the field, optionally one transition only.
    StateObserver {
        field: String,
        transition: Option<(String, String)>,
    },
    /// File watcher, by created/modified/deleted name heuristic.
    FileWatcher { event: FileEvent },
    /// Socket handler, by connected/data/disconnected name heuristic.
    SocketHandler { event: SocketEvent },
    /// The shutdown feature set (`Application-End`).
    ApplicationEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEvent {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketEvent {
    ClientConnected,
    DataReceived,
    ClientDisconnected,
}

/// Classify a feature set by name, business activity, and raw guard spec.
pub fn classify_activity(
    feature_set_name: &str,
    activity: &str,
    guard_spec: Option<&str>,
) -> ActivityKind {
    if feature_set_name == "Application-End" || activity == "Application-End" {
        return ActivityKind::ApplicationEnd;
    }

    let words: Vec<&str> = activity.split_whitespace().collect();
    let lower = activity.to_lowercase();

    if lower.contains("socket") {
        let event = if lower.contains("disconnect") {
            SocketEvent::ClientDisconnected
        } else if lower.contains("connect") {
            SocketEvent::ClientConnected
        } else {
            SocketEvent::DataReceived
        };
        return ActivityKind::SocketHandler { event };
    }

    if lower.contains("file") {
        let event = if lower.contains("modif") {
            FileEvent::Modified
        } else if lower.contains("delet") {
            FileEvent::Deleted
        } else {
            FileEvent::Created
        };
        return ActivityKind::FileWatcher { event };
    }

    match words.last() {
        Some(&"StateObserver") => {
            let field = words[..words.len() - 1].join(" ");
            if field.is_empty() {
                return ActivityKind::Plain;
            }
            let transition = guard_spec.and_then(parse_transition);
            ActivityKind::StateObserver { field, transition }
        }
        Some(&"Observer") => {
            let repository = words[..words.len() - 1].join(" ");
            if repository.ends_with("-repository") {
                ActivityKind::RepositoryObserver { repository }
            } else {
                ActivityKind::Plain
            }
        }
        Some(&"Handler") => {
            let tag = words[..words.len() - 1].join(" ");
            if tag.is_empty() {
                ActivityKind::Plain
            } else {
                ActivityKind::DomainHandler { tag }
            }
        }
        _ => ActivityKind::Plain,
    }
}

/// Parse the `from_to_to` transition form (`draft_to_paid`).
fn parse_transition(spec: &str) -> Option<(String, String)> {
    let (from, to) = spec.split_once("_to_")?;
    if from.is_empty() || to.is_empty() {
        return None;
    }
    Some((from.to_string(), to.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_handler_takes_prefix_as_tag() {
        assert_eq!(
            classify_activity("Notify", "OrderPlaced Handler", None),
            ActivityKind::DomainHandler {
                tag: "OrderPlaced".to_string()
            }
        );
    }

    #[test]
    fn repository_observer_requires_suffix() {
        assert_eq!(
            classify_activity("Log", "order-repository Observer", None),
            ActivityKind::RepositoryObserver {
                repository: "order-repository".to_string()
            }
        );
        assert_eq!(
            classify_activity("Log", "order Observer", None),
            ActivityKind::Plain
        );
    }

    #[test]
    fn state_observer_parses_transition() {
        assert_eq!(
            classify_activity("Audit", "status StateObserver", Some("draft_to_paid")),
            ActivityKind::StateObserver {
                field: "status".to_string(),
                transition: Some(("draft".to_string(), "paid".to_string())),
            }
        );
    }

    #[test]
    fn file_and_socket_heuristics() {
        assert_eq!(
            classify_activity("Watch", "File Modified Handler", None),
            ActivityKind::FileWatcher {
                event: FileEvent::Modified
            }
        );
        assert_eq!(
            classify_activity("Receive", "Socket Data Handler", None),
            ActivityKind::SocketHandler {
                event: SocketEvent::DataReceived
            }
        );
    }

    #[test]
    fn application_end_is_not_a_handler() {
        assert_eq!(
            classify_activity("Application-End", "Success", None),
            ActivityKind::ApplicationEnd
        );
    }

    #[test]
    fn plain_activity() {
        assert_eq!(classify_activity("Sum", "Math", None), ActivityKind::Plain);
    }
}
