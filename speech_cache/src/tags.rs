//! Metadata tagging of synthesized audio.
//!
//! Only MP3 is tagged. [`Id3Tagger`] writes an ID3v2.4 tag with UTF-8 text
//! frames for artist, album and title, replacing any tag the engine already
//! put in front of the audio.

use anyhow::{bail, Context};
use bytes::Bytes;
use serde_json::Value;
use tracing::error;

use crate::key::Options;

const ID3_HEADER_LEN: usize = 10;
const FLAG_UNSYNCHRONISATION: u8 = 0x80;
const FLAG_EXTENDED_HEADER: u8 = 0x40;
const FLAG_FOOTER: u8 = 0x10;
const ENCODING_UTF8: u8 = 0x03;

const FRAME_ARTIST: &[u8; 4] = b"TPE1";
const FRAME_ALBUM: &[u8; 4] = b"TALB";
const FRAME_TITLE: &[u8; 4] = b"TIT2";

/// Text written into the audio metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTags {
    pub artist: String,
    pub album: String,
    pub title: String,
}

impl AudioTags {
    /// Artist is the `voice` option when present, otherwise the language.
    pub fn for_request(engine_name: &str, message: &str, language: &str, options: Option<&Options>) -> Self {
        let artist = match options.and_then(|o| o.get(crate::ATTR_VOICE)) {
            Some(Value::String(voice)) => voice.clone(),
            Some(Value::Null) | None => language.to_string(),
            Some(other) => other.to_string(),
        };
        Self {
            artist,
            album: engine_name.to_string(),
            title: message.to_string(),
        }
    }
}

pub trait AudioTagger: Send + Sync {
    fn supports(&self, extension: &str) -> bool;

    fn write_tags(&self, data: &[u8], tags: &AudioTags) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Id3Tagger;

impl AudioTagger for Id3Tagger {
    fn supports(&self, extension: &str) -> bool {
        extension.eq_ignore_ascii_case("mp3")
    }

    fn write_tags(&self, data: &[u8], tags: &AudioTags) -> anyhow::Result<Vec<u8>> {
        let (kept_frames, audio) = split_existing_tag(data)?;

        let mut frames = kept_frames;
        write_text_frame(&mut frames, FRAME_ARTIST, &tags.artist)?;
        write_text_frame(&mut frames, FRAME_ALBUM, &tags.album)?;
        write_text_frame(&mut frames, FRAME_TITLE, &tags.title)?;

        let mut out = Vec::with_capacity(ID3_HEADER_LEN + frames.len() + audio.len());
        out.extend_from_slice(b"ID3");
        out.extend_from_slice(&[4, 0]); // v2.4.0
        out.push(0); // flags
        out.extend_from_slice(&syncsafe(frames.len()).context("ID3 tag too large")?);
        out.extend_from_slice(&frames);
        out.extend_from_slice(audio);
        Ok(out)
    }
}

/// Tag `data` if the tagger handles `extension`; on failure the untagged audio is kept.
pub(crate) fn tag_audio(tagger: &dyn AudioTagger, extension: &str, data: Bytes, tags: &AudioTags) -> Bytes {
    if !tagger.supports(extension) {
        return data;
    }
    match tagger.write_tags(&data, tags) {
        Ok(tagged) => Bytes::from(tagged),
        Err(e) => {
            error!(error = %e, extension, "Audio tag error");
            data
        }
    }
}

fn write_text_frame(out: &mut Vec<u8>, id: &[u8; 4], text: &str) -> anyhow::Result<()> {
    let size = syncsafe(1 + text.len()).context("ID3 frame too large")?;
    out.extend_from_slice(id);
    out.extend_from_slice(&size);
    out.extend_from_slice(&[0, 0]); // frame flags
    out.push(ENCODING_UTF8);
    out.extend_from_slice(text.as_bytes());
    Ok(())
}

/// Split off a leading ID3v2 tag, returning the frames worth keeping and the audio.
///
/// Frames are only carried over from plain v2.4 tags; anything else is
/// dropped and replaced by the new tag.
fn split_existing_tag(data: &[u8]) -> anyhow::Result<(Vec<u8>, &[u8])> {
    if data.len() < ID3_HEADER_LEN || &data[..3] != b"ID3" {
        return Ok((Vec::new(), data));
    }
    let major = data[3];
    let flags = data[5];
    let body_len = read_syncsafe(&data[6..10]).context("corrupt ID3 header size")?;
    let mut tag_len = ID3_HEADER_LEN + body_len;
    if flags & FLAG_FOOTER != 0 {
        tag_len += ID3_HEADER_LEN;
    }
    if tag_len > data.len() {
        bail!("ID3 tag claims {tag_len} bytes but only {} present", data.len());
    }

    let mut kept = Vec::new();
    if major == 4 && flags & (FLAG_UNSYNCHRONISATION | FLAG_EXTENDED_HEADER) == 0 {
        let body = &data[ID3_HEADER_LEN..ID3_HEADER_LEN + body_len];
        let mut pos = 0;
        while pos + ID3_HEADER_LEN <= body.len() {
            let id = &body[pos..pos + 4];
            // Padding
            if id[0] == 0 {
                break;
            }
            let frame_len = read_syncsafe(&body[pos + 4..pos + 8]).context("corrupt ID3 frame size")?;
            let end = pos + ID3_HEADER_LEN + frame_len;
            if end > body.len() {
                bail!("ID3 frame {} overruns the tag", String::from_utf8_lossy(id));
            }
            if id != FRAME_ARTIST && id != FRAME_ALBUM && id != FRAME_TITLE {
                kept.extend_from_slice(&body[pos..end]);
            }
            pos = end;
        }
    }
    Ok((kept, &data[tag_len..]))
}

/// 28-bit size as four 7-bit bytes.
fn syncsafe(size: usize) -> Option<[u8; 4]> {
    if size >= 1 << 28 {
        return None;
    }
    let size = size as u32;
    Some([
        ((size >> 21) & 0x7f) as u8,
        ((size >> 14) & 0x7f) as u8,
        ((size >> 7) & 0x7f) as u8,
        (size & 0x7f) as u8,
    ])
}

fn read_syncsafe(bytes: &[u8]) -> Option<usize> {
    if bytes.len() != 4 || bytes.iter().any(|b| b & 0x80 != 0) {
        return None;
    }
    Some(bytes.iter().fold(0usize, |acc, &b| (acc << 7) | b as usize))
}
