//! Vendor-prefix resolution for the Page Visibility API.

use crate::host::PageHost;

/// Property and event names the host uses for visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityProps {
    /// Boolean document property that reads `true` while hidden.
    pub hidden_property: &'static str,
    /// Event fired on the document when that property changes.
    pub change_event: &'static str,
}

impl VisibilityProps {
    pub const STANDARD: VisibilityProps = VisibilityProps {
        hidden_property: "hidden",
        change_event: "visibilitychange",
    };
}

impl Default for VisibilityProps {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// Candidates in lookup order.
const CANDIDATES: [VisibilityProps; 4] = [
    VisibilityProps::STANDARD,
    VisibilityProps {
        hidden_property: "webkitHidden",
        change_event: "webkitvisibilitychange",
    },
    VisibilityProps {
        hidden_property: "mozHidden",
        change_event: "mozvisibilitychange",
    },
    VisibilityProps {
        hidden_property: "msHidden",
        change_event: "msvisibilitychange",
    },
];

/// Pick the first visibility API the host document supports.
///
/// Falls back to the unprefixed pair when there is no document or nothing
/// matches.
pub fn resolve_visibility_props(host: &dyn PageHost) -> VisibilityProps {
    if !host.has_document() {
        return VisibilityProps::STANDARD;
    }

    CANDIDATES
        .iter()
        .copied()
        .find(|props| host.has_document_property(props.hidden_property))
        .unwrap_or(VisibilityProps::STANDARD)
}
