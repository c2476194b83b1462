//! Directory model, parser, and validator (spec §3, §4.4): a signed header
//! plus many embedded server descriptors, partitioned into `all_servers`
//! and the subset recommended by nickname.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::canon::canonicalize;
use crate::config::{self, allow, check_syntax, require, FieldSpec, Section};
use crate::crypto::PublicKey;
use crate::descriptor::ServerDescriptor;
use crate::digest;
use crate::error::ConfigError;

const MIN_IDENTITY_BYTES: usize = 256;
const MAX_IDENTITY_BYTES: usize = 512;
const DIGEST_LEN: usize = 20;

const DIRECTORY_SYNTAX: &[FieldSpec] = &[
    require("Version"),
    require("Published"),
    require("Valid-After"),
    require("Valid-Until"),
    allow("Recommended-Servers"),
];

const SIGNATURE_SYNTAX: &[FieldSpec] = &[
    require("DirectoryIdentity"),
    require("DirectoryDigest"),
    require("DirectorySignature"),
];

const RECOMMENDED_SOFTWARE_SYNTAX: &[FieldSpec] =
    &[allow("MixminionClient"), allow("MixminionServer")];

fn clock_skew() -> Duration {
    Duration::seconds(600)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecommendedSoftware {
    pub mixminion_client: Option<String>,
    pub mixminion_server: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DirectoryHeader {
    pub published: DateTime<Utc>,
    pub valid_after: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub recommended_nicknames: Vec<String>,
    pub directory_identity: PublicKey,
    pub directory_digest: [u8; DIGEST_LEN],
    pub recommended_software: RecommendedSoftware,
}

#[derive(Debug, Clone)]
pub struct Directory {
    pub header: DirectoryHeader,
    all_servers: Vec<ServerDescriptor>,
    servers: Vec<ServerDescriptor>,
}

impl Directory {
    pub fn parse(
        text: &str,
        validated_digests: &HashSet<[u8; DIGEST_LEN]>,
    ) -> Result<Self, ConfigError> {
        let canonical = canonicalize(text);
        let directory_digest = digest::digest(&canonical, "DirectoryDigest", "DirectorySignature");

        let (header_text, fragments) = split_at_server_sections(&canonical);

        let header_sections = config::tokenize(&header_text)?;
        let directory_section = header_sections
            .iter()
            .find(|s| s.name == "Directory")
            .ok_or_else(|| ConfigError::MissingField {
                section: "Directory".to_string(),
                key: String::new(),
            })?;
        check_syntax(directory_section, DIRECTORY_SYNTAX)?;

        let version = directory_section.get("Version").unwrap_or_default();
        if version != "0.2" {
            return Err(ConfigError::UnrecognizedDirectoryVersion);
        }

        let signature_section = header_sections
            .iter()
            .find(|s| s.name == "Signature")
            .ok_or_else(|| ConfigError::MissingField {
                section: "Signature".to_string(),
                key: String::new(),
            })?;
        check_syntax(signature_section, SIGNATURE_SYNTAX)?;

        let recommended_software_section = header_sections
            .iter()
            .find(|s| s.name == "Recommended-Software");
        if let Some(s) = recommended_software_section {
            check_syntax(s, RECOMMENDED_SOFTWARE_SYNTAX)?;
        }
        let recommended_software = RecommendedSoftware {
            mixminion_client: recommended_software_section
                .and_then(|s| s.get("MixminionClient"))
                .map(str::to_string),
            mixminion_server: recommended_software_section
                .and_then(|s| s.get("MixminionServer"))
                .map(str::to_string),
        };

        let published = config::parse_time(directory_section.get("Published").unwrap_or_default())?;
        let valid_after =
            config::parse_date(directory_section.get("Valid-After").unwrap_or_default())?;
        let valid_until =
            config::parse_date(directory_section.get("Valid-Until").unwrap_or_default())?;
        let recommended_nicknames: Vec<String> =
            config::parse_csv(directory_section.get("Recommended-Servers").unwrap_or_default())
                .into_iter()
                .map(|n| n.to_lowercase())
                .collect();

        let directory_identity =
            config::parse_public_key(signature_section.get("DirectoryIdentity").unwrap_or_default())?;
        let declared_digest_bytes =
            config::parse_base64(signature_section.get("DirectoryDigest").unwrap_or_default())?;
        if declared_digest_bytes.len() != DIGEST_LEN {
            return Err(ConfigError::InvalidDigest);
        }
        let mut declared_digest = [0u8; DIGEST_LEN];
        declared_digest.copy_from_slice(&declared_digest_bytes);

        let header = DirectoryHeader {
            published,
            valid_after,
            valid_until,
            recommended_nicknames,
            directory_identity,
            directory_digest: declared_digest,
            recommended_software,
        };

        if !validated_digests.contains(&directory_digest) {
            if directory_digest != declared_digest {
                return Err(ConfigError::InvalidDigest);
            }
            check_header_invariants(&header)?;
            let signature_b64 = signature_section
                .get("DirectorySignature")
                .ok_or(ConfigError::InvalidSignature)?;
            digest::verify(
                &canonical,
                "DirectoryDigest",
                "DirectorySignature",
                &header.directory_identity,
                signature_b64,
            )?;
        }

        let mut all_servers = Vec::with_capacity(fragments.len());
        for fragment in &fragments {
            let sections = config::tokenize(fragment)?;
            let d = ServerDescriptor::parse_sections(
                fragment.clone(),
                sections,
                false,
                validated_digests,
            )?;
            all_servers.push(d);
        }

        let servers: Vec<ServerDescriptor> = all_servers
            .iter()
            .filter(|d| {
                header
                    .recommended_nicknames
                    .contains(&d.nickname().to_lowercase())
            })
            .cloned()
            .collect();

        Ok(Directory {
            header,
            all_servers,
            servers,
        })
    }

    pub fn all_servers(&self) -> &[ServerDescriptor] {
        &self.all_servers
    }

    pub fn servers(&self) -> &[ServerDescriptor] {
        &self.servers
    }
}

fn check_header_invariants(header: &DirectoryHeader) -> Result<(), ConfigError> {
    let modulus = header.directory_identity.modulus_bytes();
    if !(MIN_IDENTITY_BYTES..=MAX_IDENTITY_BYTES).contains(&modulus) {
        return Err(ConfigError::InvalidIdentityKeyLength);
    }
    if header.valid_until <= header.valid_after {
        return Err(ConfigError::DirectoryNeverValid);
    }
    if header.published > Utc::now() + clock_skew() {
        return Err(ConfigError::DirectoryPublishedInFuture);
    }
    Ok(())
}

/// Split canonical directory text at each `[Server]` line (spec §4.4 step
/// 3): the header is everything before the first one; every subsequent
/// fragment gets `[Server]\n` re-prepended.
fn split_at_server_sections(canonical: &str) -> (String, Vec<String>) {
    let mut header = String::new();
    let mut fragments: Vec<String> = Vec::new();
    let mut current: Option<String> = None;
    for line in canonical.split_inclusive('\n') {
        if is_server_header_line(line) {
            if let Some(frag) = current.take() {
                fragments.push(frag);
            }
            current = Some(String::from("[Server]\n"));
        } else if let Some(buf) = current.as_mut() {
            buf.push_str(line);
        } else {
            header.push_str(line);
        }
    }
    if let Some(frag) = current.take() {
        fragments.push(frag);
    }
    (header, fragments)
}

fn is_server_header_line(line: &str) -> bool {
    let bare = line.trim();
    bare.starts_with('[') && bare.ends_with(']') && bare[1..bare.len() - 1].trim() == "Server"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    fn server_fragment(nickname: &str, identity: &Keypair, packet: &Keypair) -> String {
        let identity_b64 = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            identity.public.to_der().unwrap(),
        );
        let packet_b64 = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            packet.public.to_der().unwrap(),
        );
        let unsigned = canonicalize(&format!(
            "[Server]\nDescriptor-Version: 0.2\nNickname: {nickname}\nIdentity:\n-----BEGIN RSA PUBLIC KEY-----\n{identity_b64}\n-----END RSA PUBLIC KEY-----\nDigest:\nSignature:\nPublished: 2003-05-10 12:00:00\nValid-After: 2003-05-10\nValid-Until: 2003-05-17\nPacket-Key:\n-----BEGIN RSA PUBLIC KEY-----\n{packet_b64}\n-----END RSA PUBLIC KEY-----\n"
        ));
        let (signed, _) = digest::sign(&unsigned, "Digest", "Signature", identity).unwrap();
        signed
    }

    #[test]
    fn s4_partitions_recommended_and_all_servers() {
        let dir_identity = Keypair::generate(2048).unwrap();
        let server_a_identity = Keypair::generate(2048).unwrap();
        let server_a_packet = Keypair::generate(2048).unwrap();
        let server_b_identity = Keypair::generate(2048).unwrap();
        let server_b_packet = Keypair::generate(2048).unwrap();

        let frag_a = server_fragment("A", &server_a_identity, &server_a_packet);
        let frag_b = server_fragment("B", &server_b_identity, &server_b_packet);

        let dir_identity_b64 = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            dir_identity.public.to_der().unwrap(),
        );
        let unsigned_header = canonicalize(&format!(
            "[Directory]\nVersion: 0.2\nPublished: 2003-05-10 12:00:00\nValid-After: 2003-05-10\nValid-Until: 2003-05-17\nRecommended-Servers: A\n[Signature]\nDirectoryIdentity:\n-----BEGIN RSA PUBLIC KEY-----\n{dir_identity_b64}\n-----END RSA PUBLIC KEY-----\nDirectoryDigest:\nDirectorySignature:\n{frag_a}{frag_b}"
        ));
        let (signed, _) = digest::sign(
            &unsigned_header,
            "DirectoryDigest",
            "DirectorySignature",
            &dir_identity,
        )
        .unwrap();

        let parsed = Directory::parse(&signed, &HashSet::new()).unwrap();
        assert_eq!(parsed.header.recommended_nicknames, vec!["a".to_string()]);
        assert_eq!(parsed.all_servers().len(), 2);
        assert_eq!(parsed.servers().len(), 1);
        assert_eq!(parsed.servers()[0].nickname(), "A");
    }
}
