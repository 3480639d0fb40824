//! Text wire codec.
//!
//! Record format: `TAG|field1|field2|...`. List fields use `,` between the
//! values of one entry and `;` between entries. Decoding never fails: input
//! that cannot be understood becomes [`Message::Unknown`], and numbers that do
//! not parse degrade to zero so one corrupted field does not lose the record.

use crate::protocol::{EntityPositionRecord, EntityStateRecord, Message, MessageKind};
use arena_core::{Color, EntityKind, GameSettings, PeerId, Vec2};
use std::str::FromStr;
use tracing::trace;

/// Separates top-level fields.
pub const FIELD_DELIM: char = '|';
/// Separates entries of a list field.
pub const ENTRY_DELIM: char = ';';
/// Separates values within one list entry.
pub const VALUE_DELIM: char = ',';

/// Encode a message as a wire record.
pub fn encode(msg: &Message) -> String {
    match msg {
        Message::Connect {
            peer,
            name,
            color,
            player_id,
        } => format!(
            "{}|{peer}|{name}|{},{},{}|{player_id}",
            MessageKind::Connect.tag(),
            color.r,
            color.g,
            color.b
        ),
        Message::Disconnect { peer } => format!("{}|{peer}", MessageKind::Disconnect.tag()),
        Message::Move {
            peer,
            position,
            velocity,
        } => format!(
            "{}|{peer}|{}|{}|{}|{}",
            MessageKind::Move.tag(),
            position.x,
            position.y,
            velocity.x,
            velocity.y
        ),
        Message::PlayerState {
            peer,
            position,
            health,
        } => format!(
            "{}|{peer}|{}|{}|{health}",
            MessageKind::PlayerState.tag(),
            position.x,
            position.y
        ),
        Message::Bullet {
            shooter,
            seq,
            position,
            velocity,
        } => format!(
            "{}|{shooter}|{seq}|{}|{}|{}|{}",
            MessageKind::Bullet.tag(),
            position.x,
            position.y,
            velocity.x,
            velocity.y
        ),
        Message::PlayerHit {
            target,
            attacker,
            damage,
            seq,
        } => format!(
            "{}|{target}|{attacker}|{damage}|{seq}",
            MessageKind::PlayerHit.tag()
        ),
        Message::PlayerDeath { peer, killer } => {
            format!("{}|{peer}|{killer}", MessageKind::PlayerDeath.tag())
        }
        Message::EntityAdd {
            id,
            position,
            health,
        } => format!(
            "{}|{id}|{}|{}|{health}",
            MessageKind::EntityAdd.tag(),
            position.x,
            position.y
        ),
        Message::EntityRemove { id } => format!("{}|{id}", MessageKind::EntityRemove.tag()),
        Message::EntityDamage {
            id,
            shooter,
            damage,
            health,
            seq,
        } => format!(
            "{}|{id}|{shooter}|{damage}|{health}|{seq}",
            MessageKind::EntityDamage.tag()
        ),
        Message::EntityPositions(records) => {
            format!(
                "{}|{}",
                MessageKind::EntityPositions.tag(),
                encode_position_records(records)
            )
        }
        Message::EntityState(records) => {
            let entries: Vec<String> = records
                .iter()
                .map(|r| {
                    format!(
                        "{},{},{},{},{}",
                        r.id,
                        r.kind.as_u8(),
                        r.position.x,
                        r.position.y,
                        r.health
                    )
                })
                .collect();
            format!(
                "{}|{}",
                MessageKind::EntityState.tag(),
                entries.join(&ENTRY_DELIM.to_string())
            )
        }
        Message::EntityValidate(ids) => {
            let entries: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
            format!(
                "{}|{}",
                MessageKind::EntityValidate.tag(),
                entries.join(&ENTRY_DELIM.to_string())
            )
        }
        Message::Kill { id, killer, seq } => {
            format!("{}|{id}|{killer}|{seq}", MessageKind::Kill.tag())
        }
        Message::Ready { peer, ready } => {
            format!("{}|{peer}|{}", MessageKind::Ready.tag(), u8::from(*ready))
        }
        Message::StartGame { seed } => format!("{}|{seed}", MessageKind::StartGame.tag()),
        Message::Chat { peer, text } => format!("{}|{peer}|{text}", MessageKind::Chat.tag()),
        Message::SettingsUpdate(settings) => {
            let entries: Vec<String> = settings
                .to_pairs()
                .into_iter()
                .map(|(k, v)| format!("{}={}", sanitize_key(&k), sanitize_text(&v)))
                .collect();
            format!(
                "{}|{}",
                MessageKind::SettingsUpdate.tag(),
                entries.join(&ENTRY_DELIM.to_string())
            )
        }
        Message::SettingsRequest { peer } => {
            format!("{}|{peer}", MessageKind::SettingsRequest.tag())
        }
        Message::ChunkStart {
            kind_tag,
            total,
            chunk_id,
        } => format!(
            "{}|{kind_tag}|{total}|{chunk_id}",
            MessageKind::ChunkStart.tag()
        ),
        Message::ChunkPart {
            chunk_id,
            index,
            data,
        } => format!("{}|{chunk_id}|{index}|{data}", MessageKind::ChunkPart.tag()),
        Message::ChunkEnd { chunk_id } => format!("{}|{chunk_id}", MessageKind::ChunkEnd.tag()),
        Message::Unknown(raw) => raw.clone(),
    }
}

/// Encode the list field of an `EP` batch.
///
/// Exposed so the host can size a batch before committing to it.
pub fn encode_position_records(records: &[EntityPositionRecord]) -> String {
    let entries: Vec<String> = records
        .iter()
        .map(|r| {
            format!(
                "{},{},{},{},{},{}",
                r.id, r.position.x, r.position.y, r.velocity.x, r.velocity.y, r.health
            )
        })
        .collect();
    entries.join(&ENTRY_DELIM.to_string())
}

/// Decode a wire record, degrading to [`Message::Unknown`] on failure.
pub fn decode(raw: &str) -> Message {
    let decoded = split_tag(raw).and_then(|(tag, body)| {
        let kind = MessageKind::from_tag(tag)?;
        decode_body(kind, body)
    });
    match decoded {
        Some(msg) => msg,
        None => {
            trace!(len = raw.len(), "undecodable record");
            Message::Unknown(raw.to_string())
        }
    }
}

/// Split `TAG|body` into its tag and body.
///
/// Returns `None` when the record has no field delimiter at all.
pub fn split_tag(raw: &str) -> Option<(&str, &str)> {
    raw.split_once(FIELD_DELIM)
}

/// Decode the body (everything after `TAG|`) of a record of known kind.
pub fn decode_body(kind: MessageKind, body: &str) -> Option<Message> {
    if kind == MessageKind::ChunkPart {
        // The data slice is an arbitrary fragment of another record and may
        // itself contain field delimiters.
        let mut parts = body.splitn(3, FIELD_DELIM);
        let chunk_id = non_empty(parts.next())?;
        let index = parse_num(parts.next()?);
        let data = parts.next()?.to_string();
        return Some(Message::ChunkPart {
            chunk_id: chunk_id.to_string(),
            index,
            data,
        });
    }

    let f: Vec<&str> = body.split(FIELD_DELIM).collect();
    let msg = match kind {
        MessageKind::Connect => {
            need(&f, 3)?;
            Message::Connect {
                peer: peer_at(&f, 0)?,
                name: f[1].to_string(),
                color: parse_color(f[2]),
                player_id: f.get(3).map(|s| parse_num(s)).unwrap_or(0),
            }
        }
        MessageKind::Disconnect => Message::Disconnect {
            peer: peer_at(&f, 0)?,
        },
        MessageKind::Move => {
            need(&f, 5)?;
            Message::Move {
                peer: peer_at(&f, 0)?,
                position: vec_at(&f, 1),
                velocity: vec_at(&f, 3),
            }
        }
        MessageKind::PlayerState => {
            need(&f, 4)?;
            Message::PlayerState {
                peer: peer_at(&f, 0)?,
                position: vec_at(&f, 1),
                health: parse_num(f[3]),
            }
        }
        MessageKind::Bullet => {
            need(&f, 6)?;
            Message::Bullet {
                shooter: peer_at(&f, 0)?,
                seq: parse_num(f[1]),
                position: vec_at(&f, 2),
                velocity: vec_at(&f, 4),
            }
        }
        MessageKind::PlayerHit => {
            need(&f, 3)?;
            Message::PlayerHit {
                target: peer_at(&f, 0)?,
                attacker: peer_at(&f, 1)?,
                damage: parse_num(f[2]),
                seq: f.get(3).map(|s| parse_num(s)).unwrap_or(0),
            }
        }
        MessageKind::PlayerDeath => {
            need(&f, 2)?;
            Message::PlayerDeath {
                peer: peer_at(&f, 0)?,
                killer: peer_at(&f, 1)?,
            }
        }
        MessageKind::EntityAdd => {
            need(&f, 4)?;
            Message::EntityAdd {
                id: parse_num(non_empty(Some(f[0]))?),
                position: vec_at(&f, 1),
                health: parse_num(f[3]),
            }
        }
        MessageKind::EntityRemove => Message::EntityRemove {
            id: parse_num(non_empty(Some(f[0]))?),
        },
        MessageKind::EntityDamage => {
            need(&f, 4)?;
            Message::EntityDamage {
                id: parse_num(non_empty(Some(f[0]))?),
                shooter: peer_at(&f, 1)?,
                damage: parse_num(f[2]),
                health: parse_num(f[3]),
                seq: f.get(4).map(|s| parse_num(s)).unwrap_or(0),
            }
        }
        MessageKind::EntityPositions => Message::EntityPositions(decode_position_records(f[0])),
        MessageKind::EntityState => Message::EntityState(decode_state_records(f[0])),
        MessageKind::EntityValidate => Message::EntityValidate(
            f[0].split(ENTRY_DELIM)
                .filter(|e| !e.trim().is_empty())
                .map(parse_num)
                .collect(),
        ),
        MessageKind::Kill => {
            need(&f, 2)?;
            Message::Kill {
                id: parse_num(non_empty(Some(f[0]))?),
                killer: peer_at(&f, 1)?,
                seq: f.get(2).map(|s| parse_num(s)).unwrap_or(0),
            }
        }
        MessageKind::Ready => {
            need(&f, 2)?;
            Message::Ready {
                peer: peer_at(&f, 0)?,
                ready: matches!(f[1].trim(), "1" | "true"),
            }
        }
        MessageKind::StartGame => Message::StartGame {
            seed: parse_num(f[0]),
        },
        MessageKind::Chat => {
            need(&f, 2)?;
            // Older peers may not sanitize; extra fields are part of the text.
            Message::Chat {
                peer: peer_at(&f, 0)?,
                text: f[1..].join(" "),
            }
        }
        MessageKind::SettingsUpdate => {
            let (settings, errors) = GameSettings::from_pairs(
                f[0].split(ENTRY_DELIM)
                    .filter_map(|entry| entry.split_once('=')),
            );
            for err in errors {
                trace!(%err, "ignoring settings entry");
            }
            Message::SettingsUpdate(settings)
        }
        MessageKind::SettingsRequest => Message::SettingsRequest {
            peer: peer_at(&f, 0)?,
        },
        MessageKind::ChunkStart => {
            need(&f, 3)?;
            Message::ChunkStart {
                kind_tag: non_empty(Some(f[0]))?.to_string(),
                total: parse_num(f[1]),
                chunk_id: non_empty(Some(f[2]))?.to_string(),
            }
        }
        MessageKind::ChunkPart => unreachable!("handled above"),
        MessageKind::ChunkEnd => Message::ChunkEnd {
            chunk_id: non_empty(Some(f[0]))?.to_string(),
        },
    };
    Some(msg)
}

/// Decode the list field of an `EP` batch. Short entries are skipped.
pub fn decode_position_records(field: &str) -> Vec<EntityPositionRecord> {
    field
        .split(ENTRY_DELIM)
        .filter_map(|entry| {
            let v: Vec<&str> = entry.split(VALUE_DELIM).collect();
            if v.len() < 6 || v[0].trim().is_empty() {
                return None;
            }
            Some(EntityPositionRecord {
                id: parse_num(v[0]),
                position: Vec2::new(parse_num(v[1]), parse_num(v[2])),
                velocity: Vec2::new(parse_num(v[3]), parse_num(v[4])),
                health: parse_num(v[5]),
            })
        })
        .collect()
}

/// Decode the list field of an `ES` sync. Short or mis-kinded entries are skipped.
pub fn decode_state_records(field: &str) -> Vec<EntityStateRecord> {
    field
        .split(ENTRY_DELIM)
        .filter_map(|entry| {
            let v: Vec<&str> = entry.split(VALUE_DELIM).collect();
            if v.len() < 5 || v[0].trim().is_empty() {
                return None;
            }
            Some(EntityStateRecord {
                id: parse_num(v[0]),
                kind: EntityKind::from_u8(parse_num(v[1]))?,
                position: Vec2::new(parse_num(v[2]), parse_num(v[3])),
                health: parse_num(v[4]),
            })
        })
        .collect()
}

/// Parse a number, degrading to the type's default on failure.
pub fn parse_num<T: FromStr + Default>(s: &str) -> T {
    s.trim().parse().unwrap_or_default()
}

/// Replace every wire delimiter and line break with a space.
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            FIELD_DELIM | ENTRY_DELIM | VALUE_DELIM | '\n' | '\r' => ' ',
            other => other,
        })
        .collect()
}

fn sanitize_key(key: &str) -> String {
    sanitize_text(key).replace('=', "_")
}

fn need(f: &[&str], n: usize) -> Option<()> {
    (f.len() >= n).then_some(())
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

fn peer_at(f: &[&str], i: usize) -> Option<PeerId> {
    non_empty(f.get(i).copied()).map(PeerId::new)
}

fn vec_at(f: &[&str], i: usize) -> Vec2 {
    Vec2::new(
        f.get(i).map(|s| parse_num(s)).unwrap_or_default(),
        f.get(i + 1).map(|s| parse_num(s)).unwrap_or_default(),
    )
}

fn parse_color(field: &str) -> Color {
    let mut channels = field.split(VALUE_DELIM).map(parse_num::<u8>);
    Color::rgb(
        channels.next().unwrap_or_default(),
        channels.next().unwrap_or_default(),
        channels.next().unwrap_or_default(),
    )
}
