//! Loads feed lists and installer status files into the index.
//!
//! Feeds may be read eagerly (everything flagged for detail up front) or
//! lazily: load with no flags, mark the names of interest with
//! [`PkgIndex::request_detail`], then let [`load_package_details`] re-read
//! the feeds until every referenced stanza has been pulled in.

use std::io::{self, BufRead, BufReader};
use std::path::Path;

use flate2::read::GzDecoder;

use crate::config::Config;
use crate::index::PkgIndex;
use crate::package::{FieldMask, LineOutcome, Package, StanzaParser, StateFlags};

/// Backstop for the detail loop; each pass marks what it saw, so the loop
/// already terminates on its own, but never silently.
const MAX_DETAIL_PASSES: usize = 32;

#[derive(Debug, thiserror::Error)]
#[error("Failed to load package feed")]
#[non_exhaustive]
pub struct FeedError {
    pub source: FeedErrorKind,
}

impl FeedError {
    fn from_io(err: io::Error) -> Self {
        Self {
            source: FeedErrorKind::Io(err),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub enum FeedErrorKind {
    Io(#[from] io::Error),
}

/// Drives the stanza parser over one feed or status stream.
///
/// Every stanza is seeded with the feed/destination names and the given
/// load flags. Stanzas that never picked up a detail request are dropped,
/// as are stanzas for architectures the host cannot install.
pub fn parse_feed(
    index: &mut PkgIndex,
    reader: impl BufRead,
    src: Option<&str>,
    dest: Option<&str>,
    is_status: bool,
    flags: StateFlags,
    globally_dropped: FieldMask,
) -> Result<(), FeedError> {
    let new_parser = |src: Option<&str>, dest: Option<&str>| {
        let mut pkg = Package::new();
        pkg.src = src.map(str::to_string);
        pkg.dest = dest.map(str::to_string);
        pkg.state_flag = flags;
        StanzaParser::new(pkg, FieldMask::empty(), globally_dropped)
    };

    let mut parser = new_parser(src, dest);
    for line in reader.lines() {
        let line = line.map_err(FeedError::from_io)?;
        if parser.feed_line(index, line.trim_end_matches(['\n', '\r'])) == LineOutcome::StanzaEnd {
            let done = std::mem::replace(&mut parser, new_parser(src, dest));
            insert_parsed(index, done, is_status);
        }
    }
    insert_parsed(index, parser, is_status);

    Ok(())
}

fn insert_parsed(index: &mut PkgIndex, parser: StanzaParser, is_status: bool) {
    let Some(pkg) = parser.finish() else {
        return;
    };

    // only stanzas somebody asked about get indexed
    if !pkg.state_flag.contains(StateFlags::NEED_DETAIL) {
        return;
    }

    if index.arch_priority(pkg.arch) == 0 {
        log::info!(
            "package {} version {} has no valid architecture, ignoring",
            pkg.name,
            pkg.version
        );
        return;
    }

    index.insert_pkg(pkg, is_status);
}

fn open_feed(path: &Path, gzip: bool) -> Result<Box<dyn BufRead>, FeedError> {
    let file = fs_err::File::open(path).map_err(FeedError::from_io)?;
    Ok(if gzip {
        Box::new(BufReader::new(GzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    })
}

/// Loads every configured feed list, seeding each stanza with `flags`.
/// Pass [`StateFlags::NEED_DETAIL`] to index everything eagerly.
pub fn load_feeds(index: &mut PkgIndex, config: &Config, flags: StateFlags) -> Result<(), FeedError> {
    for feed in config.feeds() {
        if !feed.path.exists() {
            continue;
        }
        log::debug!("loading feed {} from {}", feed.name, feed.path.display());
        let reader = open_feed(&feed.path, feed.gzip)?;
        parse_feed(
            index,
            reader,
            Some(&feed.name),
            None,
            false,
            flags,
            config.field_mask(),
        )?;
    }
    Ok(())
}

/// Loads the status file of every configured destination. Installed
/// records always load in full.
pub fn load_status_files(index: &mut PkgIndex, config: &Config) -> Result<(), FeedError> {
    for dest in config.dests() {
        if !dest.status_file.exists() {
            continue;
        }
        log::debug!(
            "loading status of {} from {}",
            dest.name,
            dest.status_file.display()
        );
        let reader = open_feed(&dest.status_file, false)?;
        parse_feed(
            index,
            reader,
            None,
            Some(&dest.name),
            true,
            StateFlags::NEED_DETAIL,
            config.field_mask(),
        )?;
    }
    Ok(())
}

/// Re-reads the feeds until a sweep finds no newly referenced name, so
/// every stanza reachable from the requested details ends up indexed.
/// Names that never turn up anywhere are reported and left flagged.
pub fn load_package_details(index: &mut PkgIndex, config: &Config) -> Result<(), FeedError> {
    for pass in 1.. {
        load_feeds(index, config, StateFlags::empty())?;

        let fresh = index.sweep_need_detail();
        if fresh == 0 {
            break;
        }
        if pass >= MAX_DETAIL_PASSES {
            log::error!("giving up loading package details after {pass} passes");
            break;
        }
        log::debug!("found {fresh} packages requiring details, reloading feeds");
    }

    for name in index.unresolved_detail_names() {
        log::info!("no feed provides details for {name}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::*;
    use crate::arch::ArchTable;
    use crate::package::StateStatus;

    const FEED: &str = "\
Package: busybox
Version: 1.36.1-1
Architecture: all
Depends: libc

Package: libc
Version: 2.38-1
Architecture: all

Package: unrelated
Version: 9.9
Architecture: all
";

    const STATUS: &str = "\
Package: busybox
Version: 1.36.1-1
Architecture: all
Status: install ok installed
Installed-Time: 1722470400
";

    fn config(dir: &Path, gzip: bool) -> Config {
        let toml = format!(
            r#"
[[feeds]]
name = "core"
path = "{feed}"
gzip = {gzip}

[[dests]]
name = "root"
status_file = "{status}"

[[archs]]
name = "all"
priority = 1
"#,
            feed = dir.join(if gzip { "Packages.gz" } else { "Packages" }).display(),
            status = dir.join("status").display(),
        );
        toml.parse().unwrap()
    }

    fn write_fixtures(dir: &Path, gzip: bool) {
        if gzip {
            let file = fs_err::File::create(dir.join("Packages.gz")).unwrap();
            let mut enc = GzEncoder::new(file, Compression::default());
            enc.write_all(FEED.as_bytes()).unwrap();
            enc.finish().unwrap();
        } else {
            fs_err::write(dir.join("Packages"), FEED).unwrap();
        }
        fs_err::write(dir.join("status"), STATUS).unwrap();
    }

    #[test]
    fn eager_load_indexes_whole_feed() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path(), false);
        let config = config(dir.path(), false);

        let mut idx = config.build_index();
        load_feeds(&mut idx, &config, StateFlags::NEED_DETAIL).unwrap();
        load_status_files(&mut idx, &config).unwrap();

        assert_eq!(idx.fetch_by_name("busybox").len(), 1);
        assert_eq!(idx.fetch_by_name("unrelated").len(), 1);

        // the status file merged into the feed record rather than
        // duplicating it
        let busybox = idx.fetch_installed_by_name("busybox", Some("root")).unwrap();
        assert_eq!(idx.pkg(busybox).state_status, StateStatus::Installed);
        assert_eq!(idx.pkg(busybox).src.as_deref(), Some("core"));
        assert_eq!(idx.pkg(busybox).installed_time, Some(1722470400));
    }

    #[test]
    fn gzipped_feeds_load_transparently() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path(), true);
        let config = config(dir.path(), true);

        let mut idx = config.build_index();
        load_feeds(&mut idx, &config, StateFlags::NEED_DETAIL).unwrap();
        assert_eq!(idx.fetch_by_name("busybox").len(), 1);
    }

    #[test]
    fn lazy_load_pulls_in_the_dependency_closure_only() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path(), false);
        let config = config(dir.path(), false);

        let mut idx = config.build_index();
        idx.request_detail("busybox");
        load_package_details(&mut idx, &config).unwrap();

        // the dependency closure gets flagged as stanzas insert
        assert_eq!(idx.fetch_by_name("busybox").len(), 1);
        assert_eq!(idx.fetch_by_name("libc").len(), 1);
        // nothing referenced the unrelated stanza
        assert!(idx.fetch_by_name("unrelated").is_empty());
    }

    #[test]
    fn detail_loop_survives_names_nobody_provides() {
        let dir = tempfile::tempdir().unwrap();
        write_fixtures(dir.path(), false);
        let config = config(dir.path(), false);

        let mut idx = config.build_index();
        idx.request_detail("no-such-package");
        load_package_details(&mut idx, &config).unwrap();
        assert!(idx.fetch_by_name("no-such-package").is_empty());
    }

    #[test]
    fn unsupported_arch_is_dropped_at_load() {
        let mut idx = PkgIndex::new(ArchTable::from_priorities([("x86_64", 10)]));
        parse_feed(
            &mut idx,
            std::io::Cursor::new(
                "\
Package: alien
Version: 1.0
Architecture: mips_24kc
",
            ),
            None,
            None,
            false,
            StateFlags::NEED_DETAIL,
            FieldMask::empty(),
        )
        .unwrap();
        assert!(idx.fetch_by_name("alien").is_empty());
    }

    #[test]
    fn missing_feed_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        // no fixtures written at all
        let config = config(dir.path(), false);
        let mut idx = config.build_index();
        load_feeds(&mut idx, &config, StateFlags::NEED_DETAIL).unwrap();
        load_status_files(&mut idx, &config).unwrap();
        assert!(idx.fetch_available().is_empty());
    }
}
