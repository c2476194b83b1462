//! Server descriptor model, parser, and validator (spec §3, §4.3).

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::canon::canonicalize;
use crate::config::{self, allow, allow_star, check_syntax, require, FieldSpec, Section};
use crate::crypto::PublicKey;
use crate::digest;
use crate::error::ConfigError;
use crate::interval::IntervalSet;

const MAX_CONTACT: usize = 256;
const MAX_COMMENTS: usize = 1024;
const MAX_CONTACT_FINGERPRINT: usize = 128;
const MIN_IDENTITY_BYTES: usize = 256;
const MAX_IDENTITY_BYTES: usize = 512;
const PACKET_KEY_BYTES: usize = 256;
const KEY_DIGEST_LEN: usize = 20;

fn clock_skew() -> Duration {
    Duration::seconds(600)
}

const SERVER_SYNTAX: &[FieldSpec] = &[
    require("Descriptor-Version"),
    require("Nickname"),
    require("Identity"),
    require("Digest"),
    require("Signature"),
    require("Published"),
    require("Valid-After"),
    require("Valid-Until"),
    require("Packet-Key"),
    allow("Contact"),
    allow("Comments"),
    allow("Contact-Fingerprint"),
    allow("Packet-Versions"),
    allow("Software"),
    allow("Secure-Configuration"),
    allow("Why-Insecure"),
];

const INCOMING_MMTP_SYNTAX: &[FieldSpec] = &[
    require("Version"),
    require("Port"),
    require("Protocols"),
    allow("IP"),
    allow("Hostname"),
    allow("Key-Digest"),
    allow_star("Allow"),
    allow_star("Deny"),
];

const OUTGOING_MMTP_SYNTAX: &[FieldSpec] = &[
    require("Version"),
    require("Protocols"),
    allow_star("Allow"),
    allow_star("Deny"),
];

const DELIVERY_MBOX_SYNTAX: &[FieldSpec] =
    &[require("Version"), allow("Maximum-Size"), allow("Allow-From")];
const DELIVERY_SMTP_SYNTAX: &[FieldSpec] =
    &[require("Version"), allow("Maximum-Size"), allow("Allow-From")];
const DELIVERY_FRAGMENTED_SYNTAX: &[FieldSpec] =
    &[require("Version"), require("Maximum-Fragments")];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMmtp {
    pub version: String,
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub port: u16,
    pub protocols: Vec<String>,
    pub key_digest: Option<[u8; KEY_DIGEST_LEN]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMmtp {
    pub protocols: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryMbox {
    pub maximum_size: i64,
    pub allow_from: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliverySmtp {
    pub maximum_size: i64,
    pub allow_from: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryFragmented {
    pub maximum_fragments: i64,
}

/// Route type for the second element of `routing_for`, matching the
/// original's `FWD_HOST`/`SWAP_FWD_HOST`/`FWD_IPV4`/`SWAP_FWD_IPV4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteType {
    FwdHost,
    SwapFwdHost,
    FwdIpv4,
    SwapFwdIpv4,
}

#[derive(Debug, Clone)]
pub struct ServerDescriptor {
    canonical_text: String,
    nickname: String,
    identity: PublicKey,
    packet_key: PublicKey,
    digest: [u8; KEY_DIGEST_LEN],
    published: DateTime<Utc>,
    valid_after: DateTime<Utc>,
    valid_until: DateTime<Utc>,
    contact: Option<String>,
    comments: Option<String>,
    contact_fingerprint: Option<String>,
    incoming_mmtp: Option<IncomingMmtp>,
    outgoing_mmtp: Option<OutgoingMmtp>,
    delivery_mbox: Option<DeliveryMbox>,
    delivery_smtp: Option<DeliverySmtp>,
    delivery_fragmented: Option<DeliveryFragmented>,
}

impl ServerDescriptor {
    /// Parse, prevalidate, and (unless `assume_valid`) fully validate a
    /// server descriptor. `validated_digests` elides signature checking
    /// for descriptors already known-good by digest (spec §4.3 step 4).
    pub fn parse(
        text: &str,
        assume_valid: bool,
        validated_digests: &HashSet<[u8; KEY_DIGEST_LEN]>,
    ) -> Result<Self, ConfigError> {
        let canonical = canonicalize(text);
        let sections = config::tokenize(&canonical)?;
        Self::parse_sections(canonical, sections, assume_valid, validated_digests)
    }

    pub(crate) fn parse_sections(
        canonical_text: String,
        mut sections: Vec<Section>,
        assume_valid: bool,
        validated_digests: &HashSet<[u8; KEY_DIGEST_LEN]>,
    ) -> Result<Self, ConfigError> {
        let server = sections
            .iter()
            .find(|s| s.name == "Server")
            .cloned()
            .ok_or_else(|| ConfigError::MissingField {
                section: "Server".to_string(),
                key: String::new(),
            })?;

        let version = server.get("Descriptor-Version").unwrap_or_default();
        if version != "0.2" {
            return Err(ConfigError::UnrecognizedDescriptorVersion(version.to_string()));
        }
        check_syntax(&server, SERVER_SYNTAX)?;

        // Prevalidate: drop any known section whose declared Version does
        // not match the expected value, with a warning (spec §4.3 step 2).
        sections.retain(|s| match s.name.as_str() {
            "Incoming/MMTP" | "Outgoing/MMTP" | "Delivery/MBOX" | "Delivery/SMTP"
            | "Delivery/Fragmented" => {
                let ok = s.get("Version") == Some("0.1");
                if !ok {
                    warn!(section = %s.name, "dropping section with unrecognized version");
                }
                ok
            }
            _ => true,
        });

        let nickname = config::parse_nickname(server.get("Nickname").unwrap_or_default())?;
        let identity = config::parse_public_key(server.get("Identity").unwrap_or_default())?;
        let packet_key = config::parse_public_key(server.get("Packet-Key").unwrap_or_default())?;
        let published = config::parse_time(server.get("Published").unwrap_or_default())?;
        let valid_after = config::parse_date(server.get("Valid-After").unwrap_or_default())?;
        let valid_until = config::parse_date(server.get("Valid-Until").unwrap_or_default())?;
        let contact = server.get("Contact").map(str::to_string);
        let comments = server.get("Comments").map(str::to_string);
        let contact_fingerprint = server.get("Contact-Fingerprint").map(str::to_string);

        let incoming_mmtp = match sections.iter().find(|s| s.name == "Incoming/MMTP") {
            Some(s) => Some(parse_incoming_mmtp(s)?),
            None => None,
        };
        let outgoing_mmtp = match sections.iter().find(|s| s.name == "Outgoing/MMTP") {
            Some(s) => Some(parse_outgoing_mmtp(s)?),
            None => None,
        };
        let delivery_mbox = match sections.iter().find(|s| s.name == "Delivery/MBOX") {
            Some(s) => Some(parse_delivery_mbox(s)?),
            None => None,
        };
        let delivery_smtp = match sections.iter().find(|s| s.name == "Delivery/SMTP") {
            Some(s) => Some(parse_delivery_smtp(s)?),
            None => None,
        };
        let delivery_fragmented = match sections.iter().find(|s| s.name == "Delivery/Fragmented") {
            Some(s) => Some(parse_delivery_fragmented(s)?),
            None => None,
        };

        let digest_field = server
            .get("Digest")
            .ok_or(ConfigError::InvalidDigest)?;
        let declared_digest_bytes = config::parse_base64(digest_field)?;
        if declared_digest_bytes.len() != KEY_DIGEST_LEN {
            return Err(ConfigError::InvalidDigest);
        }
        let mut declared_digest = [0u8; KEY_DIGEST_LEN];
        declared_digest.copy_from_slice(&declared_digest_bytes);

        let descriptor = ServerDescriptor {
            canonical_text: canonical_text.clone(),
            nickname,
            identity,
            packet_key,
            digest: declared_digest,
            published,
            valid_after,
            valid_until,
            contact,
            comments,
            contact_fingerprint,
            incoming_mmtp,
            outgoing_mmtp,
            delivery_mbox,
            delivery_smtp,
            delivery_fragmented,
        };

        if assume_valid {
            return Ok(descriptor);
        }

        let computed_digest = digest::digest(&canonical_text, "Digest", "Signature");
        if validated_digests.contains(&computed_digest) {
            return Ok(descriptor);
        }
        if computed_digest != declared_digest {
            return Err(ConfigError::InvalidDigest);
        }

        descriptor.check_invariants()?;

        let signature_b64 = digest::field_value(&canonical_text, "Signature")
            .ok_or(ConfigError::InvalidSignature)?;
        digest::verify(
            &canonical_text,
            "Digest",
            "Signature",
            &descriptor.identity,
            signature_b64,
        )?;

        Ok(descriptor)
    }

    fn check_invariants(&self) -> Result<(), ConfigError> {
        let modulus = self.identity.modulus_bytes();
        if !(MIN_IDENTITY_BYTES..=MAX_IDENTITY_BYTES).contains(&modulus) {
            return Err(ConfigError::InvalidIdentityKeyLength);
        }
        if self.packet_key.modulus_bytes() != PACKET_KEY_BYTES {
            return Err(ConfigError::InvalidPacketKeyLength);
        }
        if self.valid_until <= self.valid_after {
            return Err(ConfigError::ServerNeverValid);
        }
        if self.published > Utc::now() + clock_skew() {
            return Err(ConfigError::PublishedInFuture);
        }
        if let Some(c) = &self.contact {
            if c.len() > MAX_CONTACT {
                return Err(ConfigError::ContactTooLong);
            }
        }
        if let Some(c) = &self.comments {
            if c.len() > MAX_COMMENTS {
                return Err(ConfigError::CommentsTooLong);
            }
        }
        if let Some(c) = &self.contact_fingerprint {
            if c.len() > MAX_CONTACT_FINGERPRINT {
                return Err(ConfigError::ContactFingerprintTooLong);
            }
        }
        if let Some(incoming) = &self.incoming_mmtp {
            if incoming.ip.is_none() && incoming.hostname.is_none() {
                return Err(ConfigError::IncomingMmtpMissingAddress);
            }
            if let Some(declared) = incoming.key_digest {
                let recomputed = self
                    .identity
                    .key_digest()
                    .map_err(|_| ConfigError::InvalidKeyDigest("identity key".to_string()))?;
                if declared != recomputed {
                    return Err(ConfigError::KeyDigestMismatch);
                }
            }
        }
        Ok(())
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn digest(&self) -> &[u8; KEY_DIGEST_LEN] {
        &self.digest
    }

    pub fn ip(&self) -> Option<&str> {
        self.incoming_mmtp.as_ref().and_then(|m| m.ip.as_deref())
    }

    pub fn hostname(&self) -> Option<&str> {
        self.incoming_mmtp
            .as_ref()
            .and_then(|m| m.hostname.as_deref())
    }

    pub fn port(&self) -> Option<u16> {
        self.incoming_mmtp.as_ref().map(|m| m.port)
    }

    pub fn packet_key(&self) -> &PublicKey {
        &self.packet_key
    }

    pub fn identity(&self) -> &PublicKey {
        &self.identity
    }

    /// `SHA1(encode_public_key(identity))` — the original ignores any
    /// declared `Key-Digest` and always recomputes (spec §9 Open Question).
    pub fn key_digest(&self) -> Result<[u8; KEY_DIGEST_LEN], ConfigError> {
        self.identity
            .key_digest()
            .map_err(|_| ConfigError::InvalidKeyDigest("identity key".to_string()))
    }

    pub fn incoming_protocols(&self) -> &[String] {
        self.incoming_mmtp
            .as_ref()
            .map(|m| m.protocols.as_slice())
            .unwrap_or(&[])
    }

    pub fn outgoing_protocols(&self) -> &[String] {
        self.outgoing_mmtp
            .as_ref()
            .map(|m| m.protocols.as_slice())
            .unwrap_or(&[])
    }

    pub fn caps(&self) -> Vec<&'static str> {
        let mut caps = Vec::new();
        if self.incoming_mmtp.is_some() {
            caps.push("relay");
        }
        if self.delivery_mbox.is_some() {
            caps.push("mbox");
        }
        if self.delivery_smtp.is_some() {
            caps.push("smtp");
        }
        if self.delivery_fragmented.is_some() {
            caps.push("fragmented");
        }
        caps
    }

    pub fn published(&self) -> DateTime<Utc> {
        self.published
    }

    pub fn valid_after(&self) -> DateTime<Utc> {
        self.valid_after
    }

    pub fn valid_until(&self) -> DateTime<Utc> {
        self.valid_until
    }

    pub fn valid_at(&self, t: DateTime<Utc>) -> bool {
        self.valid_after <= t && t <= self.valid_until
    }

    pub fn valid_from(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        self.valid_after <= a && b <= self.valid_until
    }

    pub fn valid_at_part_of(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        self.valid_after <= b && a <= self.valid_until
    }

    pub fn is_newer_than_time(&self, t: DateTime<Utc>) -> bool {
        self.published > t
    }

    pub fn is_newer_than(&self, other: &ServerDescriptor) -> bool {
        self.published > other.published
    }

    pub fn interval_set(&self) -> IntervalSet {
        IntervalSet::single(self.valid_after, self.valid_until)
    }

    /// True iff every instant `self` is valid at is also covered by some
    /// `other` with a matching (lower-cased) nickname published later.
    pub fn is_superseded_by(&self, others: &[ServerDescriptor]) -> bool {
        let mut remaining = self.interval_set();
        let self_nick = self.nickname.to_lowercase();
        for other in others {
            if other.published > self.published && other.nickname.to_lowercase() == self_nick {
                remaining = remaining.difference(&other.interval_set());
                if remaining.is_empty() {
                    return true;
                }
            }
        }
        remaining.is_empty()
    }

    /// Preserved nickname shortcut (spec §9): a descriptor can relay to
    /// itself by nickname match alone, with no protocol overlap required.
    pub fn can_relay_to(&self, other: &ServerDescriptor) -> bool {
        if self.nickname.to_lowercase() == other.nickname.to_lowercase() {
            return true;
        }
        let other_in: HashSet<&str> = other.incoming_protocols().iter().map(String::as_str).collect();
        self.outgoing_protocols()
            .iter()
            .any(|p| other_in.contains(p.as_str()))
    }

    pub fn can_start_at(&self, supported_versions: &[&str]) -> bool {
        self.incoming_mmtp
            .as_ref()
            .map(|m| supported_versions.contains(&m.version.as_str()))
            .unwrap_or(false)
    }

    pub fn routing_for(
        &self,
        other: &ServerDescriptor,
        swap: bool,
    ) -> Result<(RouteType, Vec<u8>), crate::error::MixError> {
        if !self.can_relay_to(other) {
            return Err(crate::error::MixError::Generic(
                "routing_for requires can_relay_to(other)".to_string(),
            ));
        }
        if let (Some(our_host), Some(their_host)) = (self.hostname(), other.hostname()) {
            let _ = our_host;
            let port = other.port().unwrap_or(0);
            let mut info = their_host.as_bytes().to_vec();
            info.push(b':');
            info.extend_from_slice(port.to_string().as_bytes());
            let route = if swap {
                RouteType::SwapFwdHost
            } else {
                RouteType::FwdHost
            };
            return Ok((route, info));
        }
        let ip = other.ip().unwrap_or_default();
        let port = other.port().unwrap_or(0);
        let mut info: Vec<u8> = ip
            .split('.')
            .filter_map(|octet| octet.parse::<u8>().ok())
            .collect();
        info.extend_from_slice(&port.to_be_bytes());
        let route = if swap {
            RouteType::SwapFwdIpv4
        } else {
            RouteType::FwdIpv4
        };
        Ok((route, info))
    }

    pub fn canonical_text(&self) -> &str {
        &self.canonical_text
    }
}

fn parse_incoming_mmtp(section: &Section) -> Result<IncomingMmtp, ConfigError> {
    check_syntax(section, INCOMING_MMTP_SYNTAX)?;
    let version = section.get("Version").unwrap_or_default().to_string();
    let port = config::parse_int(section.get("Port").unwrap_or_default())? as u16;
    let protocols = config::parse_csv(section.get("Protocols").unwrap_or_default());
    let ip = section.get("IP").map(str::to_string);
    let hostname = section.get("Hostname").map(str::to_string);
    let key_digest = match section.get("Key-Digest") {
        None => None,
        Some(raw) => {
            let bytes = config::parse_base64(raw)?;
            if bytes.len() != KEY_DIGEST_LEN {
                return Err(ConfigError::InvalidKeyDigest(
                    "Key-Digest must be 20 bytes".to_string(),
                ));
            }
            let mut buf = [0u8; KEY_DIGEST_LEN];
            buf.copy_from_slice(&bytes);
            Some(buf)
        }
    };
    Ok(IncomingMmtp {
        version,
        ip,
        hostname,
        port,
        protocols,
        key_digest,
    })
}

fn parse_outgoing_mmtp(section: &Section) -> Result<OutgoingMmtp, ConfigError> {
    check_syntax(section, OUTGOING_MMTP_SYNTAX)?;
    Ok(OutgoingMmtp {
        protocols: config::parse_csv(section.get("Protocols").unwrap_or_default()),
    })
}

fn parse_delivery_mbox(section: &Section) -> Result<DeliveryMbox, ConfigError> {
    check_syntax(section, DELIVERY_MBOX_SYNTAX)?;
    let maximum_size = match section.get("Maximum-Size") {
        Some(raw) => config::parse_int(raw)?,
        None => 32,
    };
    let allow_from = match section.get("Allow-From") {
        Some(raw) => config::parse_bool(raw)?,
        None => true,
    };
    Ok(DeliveryMbox {
        maximum_size,
        allow_from,
    })
}

fn parse_delivery_smtp(section: &Section) -> Result<DeliverySmtp, ConfigError> {
    check_syntax(section, DELIVERY_SMTP_SYNTAX)?;
    let maximum_size = match section.get("Maximum-Size") {
        Some(raw) => config::parse_int(raw)?,
        None => 32,
    };
    let allow_from = match section.get("Allow-From") {
        Some(raw) => config::parse_bool(raw)?,
        None => true,
    };
    Ok(DeliverySmtp {
        maximum_size,
        allow_from,
    })
}

fn parse_delivery_fragmented(section: &Section) -> Result<DeliveryFragmented, ConfigError> {
    check_syntax(section, DELIVERY_FRAGMENTED_SYNTAX)?;
    Ok(DeliveryFragmented {
        maximum_fragments: config::parse_int(section.get("Maximum-Fragments").unwrap_or_default())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    fn sample_text(nickname: &str, identity: &Keypair, packet: &Keypair) -> String {
        let identity_b64 = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            identity.public.to_der().unwrap(),
        );
        let packet_b64 = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            packet.public.to_der().unwrap(),
        );
        format!(
            "[Server]\nDescriptor-Version: 0.2\nNickname: {nickname}\nIdentity:\n-----BEGIN RSA PUBLIC KEY-----\n{identity_b64}\n-----END RSA PUBLIC KEY-----\nDigest:\nSignature:\nPublished: 2003-05-10 12:00:00\nValid-After: 2003-05-10\nValid-Until: 2003-05-17\nPacket-Key:\n-----BEGIN RSA PUBLIC KEY-----\n{packet_b64}\n-----END RSA PUBLIC KEY-----\n"
        )
    }

    fn sign_sample(identity: &Keypair, packet: &Keypair, nickname: &str) -> String {
        let unsigned = canonicalize(&sample_text(nickname, identity, packet));
        let (signed, _) = digest::sign(&unsigned, "Digest", "Signature", identity).unwrap();
        signed
    }

    #[test]
    fn s1_round_trip_with_no_delivery_sections_has_empty_caps() {
        let identity = Keypair::generate(2048).unwrap();
        let packet = Keypair::generate(2048).unwrap();
        let signed = sign_sample(&identity, &packet, "Example");
        let parsed = ServerDescriptor::parse(&signed, false, &HashSet::new()).unwrap();
        assert_eq!(parsed.nickname(), "Example");
        assert!(parsed.caps().is_empty());
    }

    #[test]
    fn s2_bit_flipped_signature_is_rejected() {
        let identity = Keypair::generate(2048).unwrap();
        let packet = Keypair::generate(2048).unwrap();
        let signed = sign_sample(&identity, &packet, "Example");
        let sig_b64 = digest::field_value(&signed, "Signature").unwrap().to_string();
        let mut sig_bytes =
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &sig_b64).unwrap();
        sig_bytes[0] ^= 0x01;
        let tampered_b64 =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &sig_bytes);
        let tampered = signed.replace(&sig_b64, &tampered_b64);
        let err = ServerDescriptor::parse(&tampered, false, &HashSet::new()).unwrap_err();
        assert_eq!(err, ConfigError::InvalidSignature);
    }

    #[test]
    fn s4_validated_digest_cache_skips_signature_check() {
        let identity = Keypair::generate(2048).unwrap();
        let packet = Keypair::generate(2048).unwrap();
        let signed = sign_sample(&identity, &packet, "Example");
        let canonical = canonicalize(&signed);
        let d = digest::digest(&canonical, "Digest", "Signature");

        let sig_b64 = digest::field_value(&signed, "Signature").unwrap().to_string();
        let mut sig_bytes =
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &sig_b64).unwrap();
        sig_bytes[0] ^= 0x01;
        let tampered_b64 =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &sig_bytes);
        let tampered = signed.replace(&sig_b64, &tampered_b64);

        let mut cache = HashSet::new();
        cache.insert(d);
        let parsed = ServerDescriptor::parse(&tampered, false, &cache).unwrap();
        assert_eq!(parsed.nickname(), "Example");
    }

    #[test]
    fn never_valid_descriptor_is_rejected() {
        let identity = Keypair::generate(2048).unwrap();
        let packet = Keypair::generate(2048).unwrap();
        let text = sample_text("Example", &identity, &packet)
            .replace("Valid-After: 2003-05-10", "Valid-After: 2003-05-10")
            .replace("Valid-Until: 2003-05-17", "Valid-Until: 2003-05-09");
        let canonical = canonicalize(&text);
        let (signed, _) = digest::sign(&canonical, "Digest", "Signature", &identity).unwrap();
        let err = ServerDescriptor::parse(&signed, false, &HashSet::new()).unwrap_err();
        assert_eq!(err, ConfigError::ServerNeverValid);
    }

    #[test]
    fn nickname_shortcut_allows_self_relay_without_protocol_overlap() {
        let identity = Keypair::generate(2048).unwrap();
        let packet = Keypair::generate(2048).unwrap();
        let signed = sign_sample(&identity, &packet, "Example");
        let parsed = ServerDescriptor::parse(&signed, false, &HashSet::new()).unwrap();
        assert!(parsed.can_relay_to(&parsed));
    }
}
