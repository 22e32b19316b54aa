//! Resynchronizing decoder for the newest (v6) page format.
//!
//! ## Why a recovery parser?
//!
//! v6 page blobs do not expose a record table the decoder can verify, so
//! stroke records cannot be located by offset arithmetic alone. The decoder
//! treats everything after the fixed header as a search space: at each byte
//! offset it reads a candidate stroke header and keeps it only if every
//! field is plausible for real ink (known brush-code range, realistic brush
//! size and point count, points that fit in the remaining window). A
//! rejected candidate moves the cursor forward by exactly one byte, which
//! bounds the work by the input size on any input.
//!
//! ## Layout
//!
//! ```text
//! [43 preamble incl. "version=6"][5 meta][5 flags][u32 layers][16 id][7 meta]
//! then per layer:  stroke* "Layer " name
//! stroke:  u32 brush | u32 color | u32 padding | f32 size | f32 reserved | u32 n
//!          n × (f32 x, y, speed, direction, width, pressure)
//! ```
//!
//! The decoder is a pure function over an immutable slice: it can be called
//! concurrently on independent buffers and fuzzed in isolation.

use crate::error::StructuralFailure;
use crate::model::{FormatRevision, Layer, Page, SamplePoint, Stroke, StrokeDocument};
use tracing::{debug, warn};

/// Length of the textual preamble that carries the revision marker.
pub const HEADER_LEN: usize = 43;

const REVISION_MARKER: &[u8] = b"version=6";
const META_LEN: usize = 5;
const FLAGS_LEN: usize = 5;
const ID_LEN: usize = 16;
const TRAILING_META_LEN: usize = 7;

const LAYER_MARKER: &[u8] = b"Layer ";
/// Layer names are scanned at most this far from the marker start.
const MAX_LAYER_NAME_SPAN: usize = 20;
/// Upper bound on layers honoured from the header's layer count.
const MAX_LAYERS: u32 = 1024;

const STROKE_HEADER_LEN: usize = 24;
const POINT_LEN: usize = 24;
/// The stroke scan stops once this few bytes remain in the window.
const MIN_WINDOW_REMAINDER: usize = 50;

// Plausibility filters. Calibrated against device output; keep exact.
const MAX_BRUSH_CODE: u32 = 50;
const MIN_BRUSH_SIZE: f32 = 0.0;
const MAX_BRUSH_SIZE: f32 = 100.0;
const MAX_POINTS: u32 = 50_000;
const MIN_COORD: f32 = -1000.0;
const MAX_COORD: f32 = 20_000.0;

/// An external decoder for the older fixed-offset revisions.
///
/// Only consulted when the v6 decoder reports
/// [`StructuralFailure::NotThisFormat`].
pub trait LegacyDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Page, StructuralFailure>;
}

/// Sniff the format revision from the textual header.
pub fn sniff_revision(bytes: &[u8]) -> FormatRevision {
    let header = &bytes[..bytes.len().min(HEADER_LEN)];
    let key = b"version=";
    let Some(at) = header.windows(key.len()).position(|w| w == key) else {
        return FormatRevision::Unknown;
    };
    let digits: String = header[at + key.len()..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .map(|&b| b as char)
        .collect();
    match digits.as_str() {
        "3" => FormatRevision::V3,
        "5" => FormatRevision::V5,
        "6" => FormatRevision::V6,
        _ => FormatRevision::Unknown,
    }
}

/// Decode a v6 page blob into a single-page [`StrokeDocument`].
///
/// The document id is the header's 16-byte identifier as a hyphenated UUID
/// string. Fails only when the fixed header cannot be read; content past the
/// header is recovered best-effort and may yield empty layers.
pub fn decode(bytes: &[u8]) -> Result<StrokeDocument, StructuralFailure> {
    let header = read_header(bytes)?;
    let page = decode_body(bytes, &header);
    Ok(StrokeDocument::new(
        FormatRevision::V6,
        format_uuid(&header.id),
        vec![page],
        None,
    ))
}

/// Decode a v6 page blob, discarding the header identifier.
pub fn decode_page(bytes: &[u8]) -> Result<Page, StructuralFailure> {
    let header = read_header(bytes)?;
    Ok(decode_body(bytes, &header))
}

/// Decode with the v6 decoder, falling back to `legacy` for other formats.
pub fn decode_page_with_fallback(
    bytes: &[u8],
    legacy: Option<&dyn LegacyDecoder>,
) -> Result<Page, StructuralFailure> {
    match decode_page(bytes) {
        Err(StructuralFailure::NotThisFormat) => match legacy {
            Some(decoder) => {
                debug!(
                    "Not a v6 page ({:?}), trying legacy decoder",
                    sniff_revision(bytes)
                );
                decoder.decode(bytes)
            }
            None => Err(StructuralFailure::NotThisFormat),
        },
        other => other,
    }
}

// ── Header ───────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Header {
    layer_count: u32,
    id: [u8; ID_LEN],
    body_start: usize,
}

/// Bounds-checked forward reader over the fixed header.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], StructuralFailure> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(StructuralFailure::UnexpectedEof)?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32_le(&mut self) -> Result<u32, StructuralFailure> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }
}

fn read_header(bytes: &[u8]) -> Result<Header, StructuralFailure> {
    if bytes.len() < HEADER_LEN {
        return Err(StructuralFailure::NotThisFormat);
    }
    let preamble = &bytes[..HEADER_LEN];
    if !preamble
        .windows(REVISION_MARKER.len())
        .any(|w| w == REVISION_MARKER)
    {
        return Err(StructuralFailure::NotThisFormat);
    }

    let mut r = Reader {
        data: bytes,
        pos: HEADER_LEN,
    };
    r.take(META_LEN)?;
    r.take(FLAGS_LEN)?;
    let layer_count = r.u32_le()?;
    let mut id = [0u8; ID_LEN];
    id.copy_from_slice(r.take(ID_LEN)?);
    r.take(TRAILING_META_LEN)?;

    Ok(Header {
        layer_count,
        id,
        body_start: r.pos,
    })
}

fn format_uuid(id: &[u8; ID_LEN]) -> String {
    let hex: String = id.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

// ── Body ─────────────────────────────────────────────────────────────────

/// Counters for one window scan; logged, never surfaced as errors.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScanStats {
    pub rejected_candidates: usize,
    pub dropped_points: usize,
}

fn decode_body(bytes: &[u8], header: &Header) -> Page {
    let layer_count = if header.layer_count > MAX_LAYERS {
        warn!(
            "Header declares {} layers, decoding the first {}",
            header.layer_count, MAX_LAYERS
        );
        MAX_LAYERS
    } else {
        header.layer_count
    };

    let mut pos = header.body_start;
    let mut layers = Vec::with_capacity(layer_count as usize);

    for layer_idx in 0..layer_count {
        let is_last = layer_idx + 1 == layer_count;
        let marker = find_marker(bytes, pos);

        let window_end = match marker {
            Some(at) if !is_last => at,
            _ => bytes.len(),
        };

        let (strokes, stop, stats) = scan_window(bytes, pos, window_end);
        debug!(
            "Layer {}: {} strokes in [{}, {}), {} candidates rejected, {} points dropped",
            layer_idx,
            strokes.len(),
            pos,
            window_end,
            stats.rejected_candidates,
            stats.dropped_points
        );
        layers.push(Layer { strokes });

        pos = match marker {
            Some(at) => skip_layer_name(bytes, at),
            None => stop,
        };
    }

    Page { layers }
}

fn find_marker(bytes: &[u8], from: usize) -> Option<usize> {
    bytes
        .get(from..)?
        .windows(LAYER_MARKER.len())
        .position(|w| w == LAYER_MARKER)
        .map(|i| from + i)
}

/// Position just past the layer name that starts at `marker`.
fn skip_layer_name(bytes: &[u8], marker: usize) -> usize {
    let limit = (marker + MAX_LAYER_NAME_SPAN).min(bytes.len());
    let mut end = (marker + LAYER_MARKER.len()).min(limit);
    while end < limit && bytes[end] != 0 && bytes[end] != b'<' {
        end += 1;
    }
    end
}

/// Scan `[start, end)` for stroke records.
///
/// Returns the accepted strokes, the cursor where scanning stopped, and
/// rejection counters.
pub(crate) fn scan_window(bytes: &[u8], start: usize, end: usize) -> (Vec<Stroke>, usize, ScanStats) {
    let end = end.min(bytes.len());
    let mut cursor = start;
    let mut strokes = Vec::new();
    let mut stats = ScanStats::default();

    while end.saturating_sub(cursor) > MIN_WINDOW_REMAINDER {
        match read_candidate(bytes, cursor, end, &mut stats) {
            Some((stroke, next)) => {
                strokes.push(stroke);
                cursor = next;
            }
            None => {
                stats.rejected_candidates += 1;
                cursor += 1;
            }
        }
    }

    (strokes, cursor, stats)
}

/// Try to read one stroke record at `at`. On success returns the stroke and
/// the offset just past its point data.
fn read_candidate(
    bytes: &[u8],
    at: usize,
    end: usize,
    stats: &mut ScanStats,
) -> Option<(Stroke, usize)> {
    let window = &bytes[..end];

    let brush_code = read_u32(window, at)?;
    if brush_code > MAX_BRUSH_CODE {
        return None;
    }
    let color = read_u32(window, at + 4)?;
    let padding = read_u32(window, at + 8)?;
    let brush_size = read_f32(window, at + 12)?;
    if !(MIN_BRUSH_SIZE..=MAX_BRUSH_SIZE).contains(&brush_size) {
        return None;
    }
    let reserved = read_f32(window, at + 16)?;
    let count = read_u32(window, at + 20)?;
    if count == 0 || count > MAX_POINTS {
        return None;
    }

    let points_start = at + STROKE_HEADER_LEN;
    let points_end = points_start + count as usize * POINT_LEN;
    if points_end > end {
        return None;
    }

    let mut points = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let p = read_point(window, points_start + i * POINT_LEN)?;
        if is_plausible(&p) {
            points.push(p);
        } else {
            stats.dropped_points += 1;
        }
    }
    if points.is_empty() {
        return None;
    }

    let mut stroke = Stroke::new(brush_code, color, brush_size, points);
    stroke.padding = padding;
    stroke.reserved = reserved;
    Some((stroke, points_end))
}

fn read_point(bytes: &[u8], at: usize) -> Option<SamplePoint> {
    Some(SamplePoint {
        x: read_f32(bytes, at)?,
        y: read_f32(bytes, at + 4)?,
        speed: read_f32(bytes, at + 8)?,
        direction: read_f32(bytes, at + 12)?,
        width: read_f32(bytes, at + 16)?,
        pressure: read_f32(bytes, at + 20)?,
    })
}

fn is_plausible(p: &SamplePoint) -> bool {
    let finite = [p.x, p.y, p.speed, p.direction, p.width, p.pressure]
        .iter()
        .all(|v| v.is_finite());
    finite && (MIN_COORD..=MAX_COORD).contains(&p.x) && (MIN_COORD..=MAX_COORD).contains(&p.y)
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at.checked_add(4)?)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn read_f32(bytes: &[u8], at: usize) -> Option<f32> {
    read_u32(bytes, at).map(f32::from_bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PenType;

    const PREAMBLE: &[u8; 43] = b"reMarkable .lines file, version=6          ";

    fn header(layers: u32) -> Vec<u8> {
        let mut b = PREAMBLE.to_vec();
        b.extend_from_slice(&[0u8; META_LEN]);
        b.extend_from_slice(&[0u8; FLAGS_LEN]);
        b.extend_from_slice(&layers.to_le_bytes());
        b.extend_from_slice(&[
            0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab,
            0xcd, 0xef,
        ]);
        b.extend_from_slice(&[0u8; TRAILING_META_LEN]);
        b
    }

    fn push_stroke(b: &mut Vec<u8>, brush: u32, color: u32, size: f32, pts: &[[f32; 6]]) {
        b.extend_from_slice(&brush.to_le_bytes());
        b.extend_from_slice(&color.to_le_bytes());
        b.extend_from_slice(&0u32.to_le_bytes());
        b.extend_from_slice(&size.to_le_bytes());
        b.extend_from_slice(&0f32.to_le_bytes());
        b.extend_from_slice(&(pts.len() as u32).to_le_bytes());
        for p in pts {
            for v in p {
                b.extend_from_slice(&v.to_le_bytes());
            }
        }
    }

    fn pts(coords: &[(f32, f32)]) -> Vec<[f32; 6]> {
        coords
            .iter()
            .map(|&(x, y)| [x, y, 10.0, 20.0, 8.0, 0.6])
            .collect()
    }

    /// Deterministic byte generator for fuzz-style tests.
    fn lcg_bytes(seed: u64, len: usize) -> Vec<u8> {
        let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        (0..len)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                (state >> 33) as u8
            })
            .collect()
    }

    #[test]
    fn sniff_recognises_revisions() {
        assert_eq!(sniff_revision(PREAMBLE), FormatRevision::V6);
        assert_eq!(
            sniff_revision(b"reMarkable .lines file, version=5          "),
            FormatRevision::V5
        );
        assert_eq!(
            sniff_revision(b"reMarkable .lines file, version=3          "),
            FormatRevision::V3
        );
        assert_eq!(sniff_revision(b"hello"), FormatRevision::Unknown);
        assert_eq!(sniff_revision(b""), FormatRevision::Unknown);
    }

    #[test]
    fn short_or_foreign_input_is_not_this_format() {
        assert_eq!(decode(b"").unwrap_err(), StructuralFailure::NotThisFormat);
        assert_eq!(
            decode(&PREAMBLE[..40]).unwrap_err(),
            StructuralFailure::NotThisFormat
        );
        let v5 = b"reMarkable .lines file, version=5          plus some trailing bytes to be long";
        assert_eq!(decode(v5).unwrap_err(), StructuralFailure::NotThisFormat);
    }

    #[test]
    fn truncated_header_is_unexpected_eof() {
        let full = header(1);
        for cut in [HEADER_LEN, HEADER_LEN + 7, HEADER_LEN + 12, full.len() - 1] {
            assert_eq!(
                decode(&full[..cut]).unwrap_err(),
                StructuralFailure::UnexpectedEof,
                "cut at {cut}"
            );
        }
        assert!(decode(&full).is_ok());
    }

    #[test]
    fn header_only_yields_empty_layers() {
        let doc = decode(&header(2)).expect("header parses");
        assert_eq!(doc.revision, FormatRevision::V6);
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.pages[0].layers.len(), 2);
        assert!(doc.pages[0].is_empty());
        assert_eq!(doc.id, "12345678-9abc-def0-0123-456789abcdef");
    }

    #[test]
    fn decodes_single_stroke() {
        let mut b = header(1);
        push_stroke(&mut b, 17, 6, 2.0, &pts(&[(100.0, 100.0), (200.0, 200.0), (300.0, 100.0)]));
        let page = decode_page(&b).expect("decodes");
        assert_eq!(page.layers.len(), 1);
        let s = &page.layers[0].strokes[0];
        assert_eq!(s.pen, PenType::Fineliner);
        assert_eq!(s.brush_code, 17);
        assert_eq!(s.color, 6);
        assert_eq!(s.brush_size, 2.0);
        assert_eq!(s.points.len(), 3);
        assert_eq!(s.points[1].x, 200.0);
        assert_eq!(s.points[1].pressure, 0.6);
    }

    #[test]
    fn resync_skips_injected_bytes_between_strokes() {
        let first = pts(&[(10.0, 20.0), (30.0, 40.0), (50.0, 60.0)]);
        let second = pts(&[(500.0, 600.0), (700.0, 800.0)]);

        let mut clean = header(1);
        push_stroke(&mut clean, 2, 0, 2.0, &first);
        push_stroke(&mut clean, 15, 7, 3.0, &second);
        let expected = decode_page(&clean).expect("clean decodes");

        let mut dirty = header(1);
        push_stroke(&mut dirty, 2, 0, 2.0, &first);
        dirty.extend_from_slice(&[0xFF; 13]);
        push_stroke(&mut dirty, 15, 7, 3.0, &second);
        let recovered = decode_page(&dirty).expect("dirty decodes");

        assert_eq!(recovered.layers[0].strokes.len(), 2);
        assert_eq!(recovered, expected);
    }

    #[test]
    fn rejected_candidates_advance_one_byte() {
        let data = vec![0xFFu8; 300];
        let (strokes, stop, stats) = scan_window(&data, 0, data.len());
        assert!(strokes.is_empty());
        assert_eq!(stats.rejected_candidates, 300 - MIN_WINDOW_REMAINDER);
        assert_eq!(stop, 300 - MIN_WINDOW_REMAINDER);
    }

    #[test]
    fn implausible_points_are_dropped_individually() {
        let mut b = header(1);
        let points = vec![
            [10.0, 10.0, 1.0, 1.0, 1.0, 0.5],
            [f32::NAN, 10.0, 1.0, 1.0, 1.0, 0.5],
            [20.0, 25_000.0, 1.0, 1.0, 1.0, 0.5],
            [30.0, 30.0, 1.0, 1.0, 1.0, f32::INFINITY],
            [40.0, 40.0, 1.0, 1.0, 1.0, 0.5],
        ];
        push_stroke(&mut b, 2, 0, 2.0, &points);
        let page = decode_page(&b).expect("decodes");
        let s = &page.layers[0].strokes[0];
        assert_eq!(s.points.len(), 2);
        assert_eq!(s.points[0].x, 10.0);
        assert_eq!(s.points[1].x, 40.0);
    }

    #[test]
    fn stroke_with_no_valid_points_is_not_emitted() {
        let mut b = header(1);
        let bad = vec![[f32::NAN, 1.0, 1.0, 1.0, 1.0, 1.0]; 3];
        push_stroke(&mut b, 2, 0, 2.0, &bad);
        let page = decode_page(&b).expect("decodes");
        assert!(page.layers[0].strokes.is_empty());
    }

    #[test]
    fn implausible_headers_are_rejected() {
        // brush code out of range
        let mut b = header(1);
        push_stroke(&mut b, 51, 0, 2.0, &pts(&[(1.0, 1.0), (2.0, 2.0)]));
        assert!(decode_page(&b).unwrap().is_empty());

        // brush size out of range
        let mut b = header(1);
        push_stroke(&mut b, 2, 0, 150.0, &pts(&[(1.0, 1.0), (2.0, 2.0)]));
        assert!(decode_page(&b).unwrap().is_empty());

        // NaN brush size
        let mut b = header(1);
        push_stroke(&mut b, 2, 0, f32::NAN, &pts(&[(1.0, 1.0), (2.0, 2.0)]));
        assert!(decode_page(&b).unwrap().is_empty());
    }

    #[test]
    fn layers_split_on_name_marker() {
        let mut b = header(2);
        push_stroke(&mut b, 2, 0, 2.0, &pts(&[(1.0, 1.0), (2.0, 2.0), (3.0, 3.0)]));
        b.extend_from_slice(b"Layer 1\0");
        push_stroke(&mut b, 4, 1, 2.0, &pts(&[(5.0, 5.0), (6.0, 6.0), (7.0, 7.0)]));
        let page = decode_page(&b).expect("decodes");
        assert_eq!(page.layers.len(), 2);
        assert_eq!(page.layers[0].strokes.len(), 1);
        assert_eq!(page.layers[0].strokes[0].pen, PenType::Ballpoint);
        assert_eq!(page.layers[1].strokes.len(), 1);
        assert_eq!(page.layers[1].strokes[0].pen, PenType::Fineliner);
    }

    #[test]
    fn layer_name_skip_is_bounded() {
        let mut data = b"Layer ".to_vec();
        data.extend_from_slice(&[b'x'; 40]);
        assert_eq!(skip_layer_name(&data, 0), MAX_LAYER_NAME_SPAN);
        let named = b"Layer 12<rest";
        assert_eq!(skip_layer_name(named, 0), 8);
    }

    #[test]
    fn absurd_layer_count_is_bounded() {
        let doc = decode(&header(u32::MAX)).expect("header parses");
        assert_eq!(doc.pages[0].layers.len(), MAX_LAYERS as usize);
    }

    #[test]
    fn random_input_terminates_and_upholds_invariants() {
        for seed in 0..64u64 {
            let mut b = header(3);
            b.extend_from_slice(&lcg_bytes(seed, 4096));
            let page = decode_page(&b).expect("header is valid");
            for stroke in page.strokes() {
                assert!(!stroke.points.is_empty());
                for p in &stroke.points {
                    assert!(is_plausible(p));
                }
            }
            // Raw noise without a header never panics either.
            let _ = decode(&lcg_bytes(seed, 512));
        }
    }

    struct FixedLegacy;

    impl LegacyDecoder for FixedLegacy {
        fn decode(&self, _bytes: &[u8]) -> Result<Page, StructuralFailure> {
            Ok(Page {
                layers: vec![Layer::default()],
            })
        }
    }

    #[test]
    fn fallback_only_on_foreign_format() {
        let legacy = FixedLegacy;
        let v5 = b"reMarkable .lines file, version=5          ........";
        let page = decode_page_with_fallback(v5, Some(&legacy)).expect("legacy decodes");
        assert_eq!(page.layers.len(), 1);
        assert_eq!(
            decode_page_with_fallback(v5, None).unwrap_err(),
            StructuralFailure::NotThisFormat
        );

        let truncated = &header(1)[..HEADER_LEN + 2];
        assert_eq!(
            decode_page_with_fallback(truncated, Some(&legacy)).unwrap_err(),
            StructuralFailure::UnexpectedEof
        );
    }
}
