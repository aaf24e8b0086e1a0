//! Directory of known application entities.
//!
//! An [`AeDirectory`] maps AE titles to network addresses,
//! so that associations can be requested by AE title alone
//! (see [`ClientAssociationOptions::establish_via`]).
//! [`StaticDirectory`] is an in-memory directory,
//! typically filled from configuration.
//!
//! [`ClientAssociationOptions::establish_via`]: crate::association::ClientAssociationOptions::establish_via
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use snafu::{OptionExt, ResultExt, Snafu};

use crate::address::{FullAeAddr, ParseAeAddressError};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Could not parse AE address
    ParseAddress {
        source: ParseAeAddressError<Infallible>,
    },

    #[snafu(display("missing port in address `{}`", address))]
    MissingPort { address: String },

    #[snafu(display("invalid port in address `{}`", address))]
    InvalidPort {
        address: String,
        source: std::num::ParseIntError,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A known application entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AeEntry {
    pub ae_title: String,
    pub host: String,
    pub port: u16,
    /// the query/retrieve information model the entity serves, if any
    pub query_model: Option<String>,
}

impl AeEntry {
    pub fn new(ae_title: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        AeEntry {
            ae_title: ae_title.into(),
            host: host.into(),
            port,
            query_model: None,
        }
    }

    pub fn with_query_model(mut self, query_model: impl Into<String>) -> Self {
        self.query_model = Some(query_model.into());
        self
    }

    /// The socket address of the entity, as `host:port`.
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// The full address of the entity.
    pub fn to_ae_addr(&self) -> FullAeAddr<String> {
        FullAeAddr::new(self.ae_title.clone(), self.socket_addr())
    }
}

impl fmt::Display for AeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ae_title, self.socket_addr())
    }
}

/// Parse an entry from `«ae_title»@«host»:«port»`.
impl FromStr for AeEntry {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (ae_title, address) = s
            .parse::<FullAeAddr<String>>()
            .context(ParseAddressSnafu)?
            .into_parts();
        let (host, port) = address
            .rsplit_once(':')
            .context(MissingPortSnafu { address: &address })?;
        let port = port
            .parse()
            .context(InvalidPortSnafu { address: &address })?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Ok(AeEntry::new(ae_title, host, port))
    }
}

/// A source of application entity addresses.
pub trait AeDirectory {
    /// Find the entity with the given AE title.
    fn lookup(&self, ae_title: &str) -> Option<AeEntry>;
}

impl<D> AeDirectory for &D
where
    D: AeDirectory + ?Sized,
{
    fn lookup(&self, ae_title: &str) -> Option<AeEntry> {
        (**self).lookup(ae_title)
    }
}

/// An in-memory AE directory.
///
/// AE titles are matched without their space padding.
///
/// ```
/// # use dicom_ulp::directory::{AeDirectory, StaticDirectory};
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let directory = StaticDirectory::from_addresses(["STORE-SCP@10.0.0.2:104"])?;
/// let entry = directory.lookup("STORE-SCP").unwrap();
/// assert_eq!(entry.host, "10.0.0.2");
/// assert_eq!(entry.port, 104);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StaticDirectory {
    entries: BTreeMap<String, AeEntry>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from `«ae_title»@«host»:«port»` strings.
    pub fn from_addresses<I, T>(addresses: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        addresses
            .into_iter()
            .map(|address| address.as_ref().parse::<AeEntry>())
            .collect()
    }

    /// Add an entry, replacing any entry with the same AE title.
    pub fn insert(&mut self, entry: AeEntry) -> Option<AeEntry> {
        self.entries.insert(entry.ae_title.trim().to_string(), entry)
    }

    pub fn with_entry(mut self, entry: AeEntry) -> Self {
        self.insert(entry);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AeEntry> {
        self.entries.values()
    }
}

impl AeDirectory for StaticDirectory {
    fn lookup(&self, ae_title: &str) -> Option<AeEntry> {
        self.entries.get(ae_title.trim()).cloned()
    }
}

impl FromIterator<AeEntry> for StaticDirectory {
    fn from_iter<I: IntoIterator<Item = AeEntry>>(iter: I) -> Self {
        let mut directory = StaticDirectory::new();
        for entry in iter {
            directory.insert(entry);
        }
        directory
    }
}
