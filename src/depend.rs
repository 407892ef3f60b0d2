//! Compound dependencies: `libc (>= 1.2) | libc-full, kmod-fs-ext4`
//!
//! A comma-separated field value becomes one [`CompoundDepend`] per entry;
//! the `|`-separated alternatives inside an entry become its possibilities.
//! Atoms name abstract packages, never concrete versions, so parsing needs
//! mutable index access to create placeholders for names seen first here.

use crate::index::{AbstractId, PkgIndex};
use crate::package::{Operator, Package, StateFlags, Version, VersionConstraint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependKind {
    Depend,
    PreDepend,
    Recommend,
    Suggest,
    /// Best-effort dependency (`*` marker): schedule every clean provider.
    Greedy,
    Conflict,
}

/// One alternative inside a compound: a target name plus an optional
/// version bound.
#[derive(Debug, Clone, PartialEq)]
pub struct Depend {
    pub(crate) target: AbstractId,
    pub(crate) constraint: Option<VersionConstraint>,
}

impl Depend {
    pub fn target(&self) -> AbstractId {
        self.target
    }

    pub fn constraint(&self) -> Option<&VersionConstraint> {
        self.constraint.as_ref()
    }

    /// Whether the given concrete record satisfies the version bound. The
    /// target name is not checked here; callers look the atom up through
    /// the provider web first.
    pub fn satisfied_by(&self, pkg: &Package) -> bool {
        match &self.constraint {
            None => true,
            Some(c) => c.is_satisfied(&pkg.version),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompoundDepend {
    pub(crate) kind: DependKind,
    pub(crate) possibilities: Vec<Depend>,
}

impl CompoundDepend {
    pub fn kind(&self) -> DependKind {
        self.kind
    }

    pub fn possibilities(&self) -> &[Depend] {
        &self.possibilities
    }
}

/// Parses a whole dependency field value. Empty entries (trailing commas
/// show up in real feeds) are skipped.
pub fn parse_depends(index: &mut PkgIndex, kind: DependKind, list: &str) -> Vec<CompoundDepend> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| parse_compound(index, kind, item))
        .collect()
}

fn parse_compound(index: &mut PkgIndex, kind: DependKind, item: &str) -> CompoundDepend {
    let mut kind = kind;
    let mut possibilities = Vec::new();

    for alt in item.split('|') {
        let alt = alt.trim();
        if alt.is_empty() {
            continue;
        }

        // The name runs up to whitespace or a glued-on parenthesis;
        // `httpd(>= 2.4)` without the space exists in the wild.
        let name_end = alt
            .find(|c: char| c.is_whitespace() || c == '(')
            .unwrap_or(alt.len());
        let name = &alt[..name_end];
        let mut rest = alt[name_end..].trim_start();

        let mut constraint = None;
        if let Some(stripped) = rest.strip_prefix('(') {
            match stripped.split_once(')') {
                Some((inner, after)) => {
                    constraint = parse_constraint(inner);
                    rest = after.trim_start();
                }
                None => {
                    log::error!("unterminated version constraint in dependency {item:?}");
                    rest = "";
                }
            }
        }

        // A trailing `*` upgrades the whole compound to a greedy depend.
        if rest.starts_with('*') {
            kind = DependKind::Greedy;
        }

        possibilities.push(Depend {
            target: index.ensure_abstract(name),
            constraint,
        });
    }

    CompoundDepend {
        kind,
        possibilities,
    }
}

fn parse_constraint(inner: &str) -> Option<VersionConstraint> {
    let inner = inner.trim_start();
    let op_len = inner
        .chars()
        .take_while(|c| matches!(c, '<' | '>' | '='))
        .count();
    let (op, version) = inner.split_at(op_len);

    match op.parse::<Operator>() {
        Ok(op) => Some(VersionConstraint::new(op, Version::parse(version))),
        Err(()) => {
            log::debug!("no version relation in constraint {inner:?}, ignoring it");
            None
        }
    }
}

/// Renders a compound the way an unresolved-dependency report prints it:
/// alternatives joined with `" | "`, strict relations in their two-character
/// form so the output re-parses to the same meaning.
pub fn render_depend(index: &PkgIndex, dep: &CompoundDepend) -> String {
    let mut out = String::new();
    for (i, poss) in dep.possibilities.iter().enumerate() {
        if i != 0 {
            out.push_str(" | ");
        }
        out.push_str(index.apkg(poss.target).name());
        if let Some(c) = &poss.constraint {
            out.push_str(&format!(" ({c})"));
        }
    }
    out
}

/// Wires up a `Provides:` field value: every named abstract learns about
/// this provider, and a detail-needed mark on any of them spreads to the
/// provider's own abstract so the next feed pass fills it in.
pub fn parse_provides(index: &mut PkgIndex, pkg: &mut Package, list: &str) {
    let ab = index.ensure_abstract(&pkg.name);
    if !pkg.provides.contains(&ab) {
        pkg.provides.insert(0, ab);
    }
    index.add_provider(ab, ab);

    for name in list.split([',', ' ']).filter(|s| !s.is_empty()) {
        let provided = index.ensure_abstract(name);
        if index.apkg(provided).needs_detail() && !index.apkg(ab).needs_detail() {
            log::debug!(
                "propagating detail request from provided {name} to provider {}",
                pkg.name
            );
            index.flag_abstract_need_detail(ab);
        }
        index.add_provider(provided, ab);
        if !pkg.provides.contains(&provided) {
            pkg.provides.push(provided);
        }
    }
}

/// Records a `Replaces:` field value. Only the abstracts are resolved here;
/// whether a replacement also cancels a conflict (the upgrade path) is
/// decided at insertion, once the whole stanza is known.
pub fn parse_replaces(index: &mut PkgIndex, pkg: &mut Package, list: &str) {
    for name in list.split([',', ' ']).filter(|s| !s.is_empty()) {
        let old = index.ensure_abstract(name);
        if pkg.state_flag.contains(StateFlags::NEED_DETAIL) {
            index.flag_abstract_need_detail(old);
        }
        if !pkg.replaces.contains(&old) {
            pkg.replaces.push(old);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::ArchTable;

    fn index() -> PkgIndex {
        PkgIndex::new(ArchTable::from_priorities([]))
    }

    #[test]
    fn can_parse_depend_lists() {
        let mut idx = index();
        let deps = parse_depends(
            &mut idx,
            DependKind::Depend,
            "libc, libpthread (>= 1.0), httpd(>= 2.4) | uhttpd",
        );

        assert_eq!(deps.len(), 3);
        assert_eq!(deps[0].possibilities.len(), 1);
        assert_eq!(deps[2].possibilities.len(), 2);
        assert_eq!(idx.apkg(deps[0].possibilities[0].target).name(), "libc");
        assert_eq!(
            deps[1].possibilities[0].constraint.as_ref().map(|c| c.op()),
            Some(Operator::LaterEqual)
        );
        assert_eq!(idx.apkg(deps[2].possibilities[1].target).name(), "uhttpd");
    }

    #[test]
    fn trailing_comma_is_ignored() {
        let mut idx = index();
        let deps = parse_depends(&mut idx, DependKind::Depend, "libc (>= 2.1.5),");
        assert_eq!(deps.len(), 1);
    }

    #[test]
    fn star_marker_upgrades_to_greedy() {
        let mut idx = index();
        let deps = parse_depends(&mut idx, DependKind::Recommend, "luci-theme (>= 1.0) *");
        assert_eq!(deps[0].kind, DependKind::Greedy);

        let deps = parse_depends(&mut idx, DependKind::Depend, "luci-theme *");
        assert_eq!(deps[0].kind, DependKind::Greedy);
    }

    #[test]
    fn legacy_operators_canonicalize() {
        let mut idx = index();
        let deps = parse_depends(&mut idx, DependKind::Depend, "a (< 1.0), b (> 2.0)");
        assert_eq!(
            deps[0].possibilities[0].constraint.as_ref().map(|c| c.op()),
            Some(Operator::EarlierEqual)
        );
        assert_eq!(
            deps[1].possibilities[0].constraint.as_ref().map(|c| c.op()),
            Some(Operator::LaterEqual)
        );
    }

    #[test]
    fn render_parse_round_trip() {
        let mut idx = index();
        let deps = parse_depends(
            &mut idx,
            DependKind::Depend,
            "libc (>= 1.0) | musl (<< 2.0), zlib",
        );
        let rendered: Vec<String> = deps.iter().map(|d| render_depend(&idx, d)).collect();
        assert_eq!(rendered, ["libc (>= 1.0) | musl (<< 2.0)", "zlib"]);

        let reparsed = parse_depends(&mut idx, DependKind::Depend, &rendered.join(", "));
        assert_eq!(reparsed, deps);
    }

    #[test]
    fn duplicate_names_share_an_abstract() {
        let mut idx = index();
        let first = parse_depends(&mut idx, DependKind::Depend, "libc");
        let second = parse_depends(&mut idx, DependKind::Recommend, "libc");
        assert_eq!(
            first[0].possibilities[0].target,
            second[0].possibilities[0].target
        );
    }
}
