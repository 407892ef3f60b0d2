//! Parses feed index and installer status stanzas.
//!
//! A stanza is a run of `Name: value` lines ended by a blank line or EOF.
//! Continuation lines (leading space) extend `Description` and `Conffiles`
//! blocks, so the parser carries that block state per stream instead of
//! splitting the whole file up front.

use std::io::IsTerminal;

use bitflags::bitflags;

use crate::depend::{self, DependKind};
use crate::index::PkgIndex;
use crate::package::{Alternative, Conffile, Package, StateFlags, StateStatus, StateWant, Version};

bitflags! {
    /// One bit per recognized field.
    ///
    /// Callers name the fields they want *dropped*; [`FieldMask::effective`]
    /// folds in the globally masked set and inverts the result into the
    /// keep-set the line loop checks against.
    pub struct FieldMask: u32 {
        const ABIVERSION = 1 << 0;
        const ALTERNATIVES = 1 << 1;
        const ARCHITECTURE = 1 << 2;
        const AUTO_INSTALLED = 1 << 3;
        const CONFFILES = 1 << 4;
        const CONFLICTS = 1 << 5;
        const DEPENDS = 1 << 6;
        const DESCRIPTION = 1 << 7;
        const ESSENTIAL = 1 << 8;
        const FILENAME = 1 << 9;
        const INSTALLED_SIZE = 1 << 10;
        const INSTALLED_TIME = 1 << 11;
        const MAINTAINER = 1 << 12;
        const MD5SUM = 1 << 13;
        const PACKAGE = 1 << 14;
        const PRE_DEPENDS = 1 << 15;
        const PRIORITY = 1 << 16;
        const PROVIDES = 1 << 17;
        const RECOMMENDS = 1 << 18;
        const REPLACES = 1 << 19;
        const SECTION = 1 << 20;
        const SHA256SUM = 1 << 21;
        const SIZE = 1 << 22;
        const SOURCE = 1 << 23;
        const STATUS = 1 << 24;
        const SUGGESTS = 1 << 25;
        const TAGS = 1 << 26;
        const VERSION = 1 << 27;
    }
}

impl FieldMask {
    /// The keep-set for a parse run: everything not dropped by the caller
    /// or the global configuration.
    pub fn effective(dropped: FieldMask, globally_dropped: FieldMask) -> FieldMask {
        (dropped | globally_dropped) ^ FieldMask::all()
    }

    /// The bit for a control-file field name, for configured masks.
    pub fn from_field_name(name: &str) -> Option<FieldMask> {
        Some(match name {
            "ABIVersion" => FieldMask::ABIVERSION,
            "Alternatives" => FieldMask::ALTERNATIVES,
            "Architecture" => FieldMask::ARCHITECTURE,
            "Auto-Installed" => FieldMask::AUTO_INSTALLED,
            "Conffiles" => FieldMask::CONFFILES,
            "Conflicts" => FieldMask::CONFLICTS,
            "Depends" => FieldMask::DEPENDS,
            "Description" => FieldMask::DESCRIPTION,
            "Essential" => FieldMask::ESSENTIAL,
            "Filename" => FieldMask::FILENAME,
            "Installed-Size" => FieldMask::INSTALLED_SIZE,
            "Installed-Time" => FieldMask::INSTALLED_TIME,
            "Maintainer" => FieldMask::MAINTAINER,
            "MD5sum" | "MD5Sum" => FieldMask::MD5SUM,
            "Package" => FieldMask::PACKAGE,
            "Pre-Depends" => FieldMask::PRE_DEPENDS,
            "Priority" => FieldMask::PRIORITY,
            "Provides" => FieldMask::PROVIDES,
            "Recommends" => FieldMask::RECOMMENDS,
            "Replaces" => FieldMask::REPLACES,
            "Section" => FieldMask::SECTION,
            "SHA256sum" => FieldMask::SHA256SUM,
            "Size" => FieldMask::SIZE,
            "Source" => FieldMask::SOURCE,
            "Status" => FieldMask::STATUS,
            "Suggests" => FieldMask::SUGGESTS,
            "Tags" => FieldMask::TAGS,
            "Version" => FieldMask::VERSION,
            _ => return None,
        })
    }
}

impl Default for FieldMask {
    fn default() -> Self {
        FieldMask::empty()
    }
}

/// What one fed line did to the stanza.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum LineOutcome {
    Continue,
    /// Blank line: the current stanza is complete.
    StanzaEnd,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
enum Block {
    None,
    Description,
    Conffiles,
}

/// Incremental stanza parser. Feed it lines, then [`StanzaParser::finish`]
/// to take the populated record.
#[derive(Debug)]
pub struct StanzaParser {
    mask: FieldMask,
    keep_newlines: bool,
    block: Block,
    description: String,
    pkg: Package,
}

impl StanzaParser {
    /// Starts a stanza on a pre-seeded record (the loader seeds feed/dest
    /// pointers and load flags before parsing).
    pub fn new(pkg: Package, dropped: FieldMask, globally_dropped: FieldMask) -> Self {
        Self {
            mask: FieldMask::effective(dropped, globally_dropped),
            // interactive consumers get the description's line structure,
            // everyone else a single flowed string
            keep_newlines: std::io::stdout().is_terminal(),
            block: Block::None,
            description: String::new(),
            pkg,
        }
    }

    pub fn keep_newlines(mut self, keep: bool) -> Self {
        self.keep_newlines = keep;
        self
    }

    fn kept(&self, field: FieldMask) -> bool {
        self.mask.contains(field)
    }

    fn flush_block(&mut self) {
        if self.block == Block::Description && self.kept(FieldMask::DESCRIPTION) {
            self.pkg.description = Some(std::mem::take(&mut self.description));
        }
        self.block = Block::None;
    }

    /// Feeds one line (without its trailing newline) into the stanza.
    pub fn feed_line(&mut self, index: &mut PkgIndex, line: &str) -> LineOutcome {
        if let Some(rest) = line.strip_prefix(' ') {
            match self.block {
                Block::Description if self.kept(FieldMask::DESCRIPTION) => {
                    if self.keep_newlines {
                        self.description.push('\n');
                    }
                    // the continuation keeps its leading space when flowed
                    self.description.push(' ');
                    self.description.push_str(rest.trim_end());
                    return LineOutcome::Continue;
                }
                Block::Conffiles if self.kept(FieldMask::CONFFILES) => {
                    self.parse_conffile_line(rest);
                    return LineOutcome::Continue;
                }
                _ => {}
            }
        }

        if line.trim().is_empty() {
            self.flush_block();
            return LineOutcome::StanzaEnd;
        }

        let Some((name, value)) = line.split_once(':') else {
            // not a field line and not part of a block; feeds contain the
            // occasional junk line, skip it
            self.flush_block();
            return LineOutcome::Continue;
        };
        let value = value.trim();

        // entering a new field always terminates a running block
        self.flush_block();

        match name {
            "Package" if self.kept(FieldMask::PACKAGE) => {
                self.pkg.name = value.to_string();
                if let Some(ab) = index.fetch_abstract(value) {
                    if index.apkg(ab).needs_detail()
                        && !self.pkg.state_flag.contains(StateFlags::NEED_DETAIL)
                    {
                        log::debug!("propagating detail request to record {value}");
                        self.pkg.state_flag |= StateFlags::NEED_DETAIL;
                    }
                }
            }
            "Version" if self.kept(FieldMask::VERSION) => {
                self.pkg.version = Version::parse(value);
            }
            "Architecture" if self.kept(FieldMask::ARCHITECTURE) => {
                self.pkg.arch = Some(index.intern_arch(value));
            }
            "Depends" if self.kept(FieldMask::DEPENDS) => {
                let deps = depend::parse_depends(index, DependKind::Depend, value);
                self.pkg.depends.extend(deps);
            }
            "Pre-Depends" if self.kept(FieldMask::PRE_DEPENDS) => {
                let deps = depend::parse_depends(index, DependKind::PreDepend, value);
                self.pkg.depends.extend(deps);
            }
            "Recommends" if self.kept(FieldMask::RECOMMENDS) => {
                let deps = depend::parse_depends(index, DependKind::Recommend, value);
                self.pkg.depends.extend(deps);
            }
            "Suggests" if self.kept(FieldMask::SUGGESTS) => {
                let deps = depend::parse_depends(index, DependKind::Suggest, value);
                self.pkg.depends.extend(deps);
            }
            "Conflicts" if self.kept(FieldMask::CONFLICTS) => {
                let deps = depend::parse_depends(index, DependKind::Conflict, value);
                self.pkg.conflicts.extend(deps);
            }
            "Provides" if self.kept(FieldMask::PROVIDES) => {
                depend::parse_provides(index, &mut self.pkg, value);
            }
            "Replaces" if self.kept(FieldMask::REPLACES) => {
                depend::parse_replaces(index, &mut self.pkg, value);
            }
            "Conffiles" if self.kept(FieldMask::CONFFILES) => {
                self.block = Block::Conffiles;
            }
            "Description" if self.kept(FieldMask::DESCRIPTION) => {
                self.description = value.to_string();
                self.block = Block::Description;
            }
            "MD5sum" | "MD5Sum" if self.kept(FieldMask::MD5SUM) => {
                self.pkg.md5sum = Some(value.to_string());
            }
            "SHA256sum" if self.kept(FieldMask::SHA256SUM) => {
                self.pkg.sha256sum = Some(value.to_string());
            }
            "Size" if self.kept(FieldMask::SIZE) => {
                self.pkg.size = value.parse().ok();
            }
            "Installed-Size" if self.kept(FieldMask::INSTALLED_SIZE) => {
                self.pkg.installed_size = value.parse().ok();
            }
            "Installed-Time" if self.kept(FieldMask::INSTALLED_TIME) => {
                self.pkg.installed_time = value.parse().ok();
            }
            "Essential" if self.kept(FieldMask::ESSENTIAL) => {
                if value == "yes" {
                    self.pkg.essential = true;
                }
            }
            "Auto-Installed" if self.kept(FieldMask::AUTO_INSTALLED) => {
                if value == "yes" {
                    self.pkg.auto_installed = true;
                }
            }
            "Status" if self.kept(FieldMask::STATUS) => {
                self.parse_status(value);
            }
            "Alternatives" if self.kept(FieldMask::ALTERNATIVES) => {
                self.parse_alternatives(value);
            }
            "ABIVersion" if self.kept(FieldMask::ABIVERSION) => {
                self.pkg.abi_version = Some(value.to_string());
            }
            "Maintainer" if self.kept(FieldMask::MAINTAINER) => {
                self.pkg.maintainer = Some(value.to_string());
            }
            "Priority" if self.kept(FieldMask::PRIORITY) => {
                self.pkg.priority = Some(value.to_string());
            }
            "Source" if self.kept(FieldMask::SOURCE) => {
                self.pkg.source = Some(value.to_string());
            }
            "Section" if self.kept(FieldMask::SECTION) => {
                self.pkg.section = Some(value.to_string());
            }
            "Tags" if self.kept(FieldMask::TAGS) => {
                self.pkg.tags = Some(value.to_string());
            }
            "Filename" if self.kept(FieldMask::FILENAME) => {
                self.pkg.filename = Some(value.to_string());
            }
            _ => {}
        }

        LineOutcome::Continue
    }

    fn parse_status(&mut self, value: &str) {
        let tokens: Vec<&str> = value.split_whitespace().collect();
        let &[want, flags, status] = tokens.as_slice() else {
            log::error!("failed to parse Status line for {}", self.pkg.name);
            return;
        };
        self.pkg.state_want = StateWant::parse(want);
        self.pkg.state_flag |= StateFlags::parse(flags);
        self.pkg.state_status = StateStatus::parse(status);
    }

    fn parse_conffile_line(&mut self, line: &str) {
        let mut tokens = line.split_whitespace();
        match (tokens.next(), tokens.next()) {
            (Some(path), Some(md5sum)) => self.pkg.conffiles.push(Conffile {
                path: path.to_string(),
                md5sum: md5sum.to_string(),
            }),
            _ => log::error!("failed to parse Conffiles line for {}", self.pkg.name),
        }
    }

    fn parse_alternatives(&mut self, value: &str) {
        for item in value.split(',') {
            let parts: Vec<&str> = item.trim().split(':').collect();
            let &[prio, path, altpath] = parts.as_slice() else {
                continue;
            };
            // the link path must be absolute and point somewhere
            if !path.starts_with('/') || altpath.is_empty() {
                continue;
            }
            self.pkg.alternatives.push(Alternative {
                prio: prio.parse().unwrap_or(0),
                path: path.to_string(),
                altpath: altpath.to_string(),
            });
        }
    }

    /// Ends the stanza, returning the record. A stanza that never named a
    /// package (stray blank lines, comments) yields nothing.
    pub fn finish(mut self) -> Option<Package> {
        self.flush_block();
        if self.pkg.name.is_empty() {
            return None;
        }
        Some(self.pkg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::ArchTable;

    fn index() -> PkgIndex {
        PkgIndex::new(ArchTable::from_priorities([("all", 1), ("x86_64", 10)]))
    }

    fn parse(index: &mut PkgIndex, text: &str) -> Option<Package> {
        parse_masked(index, text, FieldMask::empty())
    }

    fn parse_masked(index: &mut PkgIndex, text: &str, dropped: FieldMask) -> Option<Package> {
        let mut parser =
            StanzaParser::new(Package::new(), dropped, FieldMask::empty()).keep_newlines(false);
        for line in text.lines() {
            if parser.feed_line(index, line) == LineOutcome::StanzaEnd {
                break;
            }
        }
        parser.finish()
    }

    const STANZA: &str = "\
Package: dropbear
Version: 2024.85-1
Depends: libc, libcrypto (>= 3.0)
Provides: ssh-server
Section: net
Architecture: x86_64
Size: 112233
MD5Sum: 5cf80b43e9a7d6427b4a9059a4e1d6f0
Description: small SSH server
 A lightweight SSH2 server and client.
 Designed for embedded systems.
";

    #[test]
    fn can_parse_a_feed_stanza() {
        let mut idx = index();
        let pkg = parse(&mut idx, STANZA).unwrap();

        assert_eq!(pkg.name, "dropbear");
        assert_eq!(pkg.version.to_string(), "2024.85-1");
        assert_eq!(pkg.depends.len(), 2);
        assert_eq!(pkg.section.as_deref(), Some("net"));
        assert_eq!(pkg.size, Some(112233));
        assert_eq!(idx.arch_name(pkg.arch), "x86_64");
        assert_eq!(
            pkg.md5sum.as_deref(),
            Some("5cf80b43e9a7d6427b4a9059a4e1d6f0")
        );
        assert_eq!(
            pkg.description.as_deref(),
            Some("small SSH server A lightweight SSH2 server and client. Designed for embedded systems.")
        );
        assert!(idx.fetch_abstract("ssh-server").is_some());
    }

    #[test]
    fn description_newlines_are_kept_for_terminals() {
        let mut idx = index();
        let mut parser = StanzaParser::new(Package::new(), FieldMask::empty(), FieldMask::empty())
            .keep_newlines(true);
        for line in STANZA.lines() {
            parser.feed_line(&mut idx, line);
        }
        let pkg = parser.finish().unwrap();
        assert_eq!(
            pkg.description.as_deref(),
            Some("small SSH server\n A lightweight SSH2 server and client.\n Designed for embedded systems.")
        );
    }

    #[test]
    fn status_stanza_with_conffiles() {
        let mut idx = index();
        let pkg = parse(
            &mut idx,
            "\
Package: dropbear
Version: 2024.85-1
Status: install hold,user installed
Architecture: x86_64
Conffiles:
 /etc/dropbear/dropbear_rsa_host_key 0e1e3cb91c1ea0b20ce3a1d33e56c24f
 /etc/config/dropbear 8397d4073a4e3747bbd8cd2361432f7e
Installed-Time: 1722470400
",
        )
        .unwrap();

        assert_eq!(pkg.state_want, StateWant::Install);
        assert!(pkg.state_flag.contains(StateFlags::HOLD | StateFlags::USER));
        assert_eq!(pkg.state_status, StateStatus::Installed);
        assert_eq!(pkg.conffiles.len(), 2);
        assert_eq!(pkg.conffiles[0].path, "/etc/dropbear/dropbear_rsa_host_key");
        assert_eq!(pkg.installed_time, Some(1722470400));
    }

    #[test]
    fn malformed_status_and_conffiles_are_dropped() {
        let mut idx = index();
        let pkg = parse(
            &mut idx,
            "\
Package: broken
Version: 1.0
Status: install
Conffiles:
 /etc/only-a-path
",
        )
        .unwrap();

        assert_eq!(pkg.state_want, StateWant::Unknown);
        assert!(pkg.conffiles.is_empty());
    }

    #[test]
    fn field_mask_drops_fields() {
        let mut idx = index();
        let pkg = parse_masked(
            &mut idx,
            STANZA,
            FieldMask::DESCRIPTION | FieldMask::MD5SUM,
        )
        .unwrap();

        assert_eq!(pkg.description, None);
        assert_eq!(pkg.md5sum, None);
        // unmasked fields still land
        assert_eq!(pkg.name, "dropbear");
        assert_eq!(pkg.section.as_deref(), Some("net"));
    }

    #[test]
    fn alternatives_items_are_validated() {
        let mut idx = index();
        let pkg = parse(
            &mut idx,
            "\
Package: busybox
Version: 1.36.1-1
Alternatives: 100:/bin/vi:/bin/busybox, 200:relative/path:/bin/busybox, 300:/bin/sh:
",
        )
        .unwrap();

        assert_eq!(pkg.alternatives.len(), 1);
        assert_eq!(pkg.alternatives[0].prio, 100);
        assert_eq!(pkg.alternatives[0].path, "/bin/vi");
        assert_eq!(pkg.alternatives[0].altpath, "/bin/busybox");
    }

    #[test]
    fn reparsing_is_idempotent() {
        let mut idx = index();
        let first = parse(&mut idx, STANZA).unwrap();
        let second = parse(&mut idx, STANZA).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn nameless_stanza_is_skipped() {
        let mut idx = index();
        assert_eq!(parse(&mut idx, "\n\n"), None);
        assert_eq!(parse(&mut idx, "Section: net\n"), None);
    }

    #[test]
    fn detail_request_propagates_from_abstract() {
        let mut idx = index();
        idx.request_detail("dropbear");
        let pkg = parse(&mut idx, STANZA).unwrap();
        assert!(pkg.state_flag.contains(StateFlags::NEED_DETAIL));
    }
}
