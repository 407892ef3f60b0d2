//! Package version strings of the form `[epoch:]upstream[-revision]`

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+:)?[A-Za-z0-9.+~]+(-[A-Za-z0-9.+~]+)?$").unwrap());

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Operator {
    Earlier,
    EarlierEqual,
    Equal,
    LaterEqual,
    Later,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Self::Earlier => "<<",
            Self::EarlierEqual => "<=",
            Self::Equal => "=",
            Self::LaterEqual => ">=",
            Self::Later => ">>",
        };

        write!(f, "{}", c)
    }
}

impl FromStr for Operator {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "<<" => Ok(Self::Earlier),
            "<=" => Ok(Self::EarlierEqual),
            "=" => Ok(Self::Equal),
            ">=" => Ok(Self::LaterEqual),
            ">>" => Ok(Self::Later),
            // deprecated one-character forms; dpkg reads them this way too
            "<" => Ok(Self::EarlierEqual),
            ">" => Ok(Self::LaterEqual),
            _ => Err(()),
        }
    }
}

/// A version split into its epoch, upstream and revision parts.
///
/// The parts are kept separate because they compare under different rules:
/// the epoch numerically, the other two with the digit-run aware ordering
/// implemented in [`upstream_cmp`].
#[derive(Debug, Default, Clone)]
pub struct Version {
    epoch: u32,
    upstream: String,
    revision: Option<String>,
}

impl Version {
    /// Parses a version string, leniently.
    ///
    /// Feeds in the wild carry the occasional malformed epoch; those are
    /// logged and read as 0 rather than poisoning the whole stanza.
    pub fn parse(s: &str) -> Self {
        let s = s.strip_prefix("Version:").unwrap_or(s).trim();

        if !VERSION_RE.is_match(s) {
            log::debug!("version string {s:?} does not match the documented syntax");
        }

        let (epoch, rest) = match s.split_once(':') {
            Some((e, rest)) => {
                let epoch = match e.parse::<u32>() {
                    Ok(e) => e,
                    Err(_) => {
                        log::error!("invalid epoch in version {s:?}, assuming 0");
                        0
                    }
                };
                (epoch, rest)
            }
            None => (0, s),
        };

        // The revision is everything after the last hyphen so upstream
        // versions may themselves contain hyphens.
        let (upstream, revision) = match rest.rsplit_once('-') {
            Some((u, r)) => (u.to_string(), Some(r.to_string())),
            None => (rest.to_string(), None),
        };

        Self {
            epoch,
            upstream,
            revision,
        }
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.upstream)?;
        if let Some(r) = &self.revision {
            write!(f, "-{}", r)?;
        }
        Ok(())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| upstream_cmp(&self.upstream, &other.upstream))
            .then_with(|| match (&self.revision, &other.revision) {
                (None, None) => Ordering::Equal,
                // a bare version sorts below the same version with any revision
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => upstream_cmp(a, b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sort weight of a single byte: `~` below everything including the end of
/// the string, letters below all other non-digits.
fn order(c: u8) -> i32 {
    if c == b'~' {
        -1
    } else if c.is_ascii_alphabetic() {
        i32::from(c)
    } else {
        i32::from(c) + 256
    }
}

/// Compares two upstream-version (or revision) strings.
///
/// Alternating passes: the leading non-digit runs compare byte-wise through
/// [`order`], then the following digit runs compare numerically with leading
/// zeros ignored. An exhausted string weighs 0, so `1.0~rc1` sorts below
/// `1.0`.
fn upstream_cmp(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    while i < a.len() || j < b.len() {
        while (i < a.len() && !a[i].is_ascii_digit()) || (j < b.len() && !b[j].is_ascii_digit()) {
            let ac = if i < a.len() { order(a[i]) } else { 0 };
            let bc = if j < b.len() { order(b[j]) } else { 0 };
            if ac != bc {
                return ac.cmp(&bc);
            }
            i += 1;
            j += 1;
        }

        while i < a.len() && a[i] == b'0' {
            i += 1;
        }
        while j < b.len() && b[j] == b'0' {
            j += 1;
        }

        let mut first_diff = Ordering::Equal;
        while i < a.len() && a[i].is_ascii_digit() && j < b.len() && b[j].is_ascii_digit() {
            if first_diff == Ordering::Equal {
                first_diff = a[i].cmp(&b[j]);
            }
            i += 1;
            j += 1;
        }
        // the longer digit run is the larger number
        if i < a.len() && a[i].is_ascii_digit() {
            return Ordering::Greater;
        }
        if j < b.len() && b[j].is_ascii_digit() {
            return Ordering::Less;
        }
        if first_diff != Ordering::Equal {
            return first_diff;
        }
    }

    Ordering::Equal
}

/// A version bound attached to a dependency or conflict, e.g. `(>= 1.2.0)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    pub(crate) op: Operator,
    pub(crate) version: Version,
}

impl VersionConstraint {
    pub fn new(op: Operator, version: Version) -> Self {
        Self { op, version }
    }

    pub fn op(&self) -> Operator {
        self.op
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn is_satisfied(&self, version: &Version) -> bool {
        match self.op {
            Operator::Equal => version == &self.version,
            Operator::Earlier => version < &self.version,
            Operator::Later => version > &self.version,
            Operator::EarlierEqual => version <= &self.version,
            Operator::LaterEqual => version >= &self.version,
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.version)
    }
}
