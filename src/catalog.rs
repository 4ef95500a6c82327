//! Playback Catalog: the set of representations and their segment lists,
//! as loaded from an MPD manifest.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest has no representations")]
    NoRepresentations,
    #[error("representation {0} has an empty segment list")]
    EmptySegmentList(u64),
    #[error("failed to fetch manifest: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("failed to parse manifest XML: {0}")]
    Parse(#[from] quick_xml::Error),
    #[error("malformed manifest: {0}")]
    Malformed(String),
}

/// A single bitrate rendition of the content, with its ordered segment URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Representation {
    pub id: String,
    pub bandwidth_bps: u64,
    /// URL of the initialization segment (codec headers/moov box). Carried
    /// through but never fetched by the scheduler — playback-decoder
    /// concerns are out of scope.
    pub init_url: Option<String>,
    /// Play-out position of `segment_urls[0]`; segment index `i` in the
    /// catalog's numbering is this representation's `segment_urls[i - start]`.
    pub start: usize,
    pub segment_urls: Vec<String>,
    /// Per-segment byte sizes, same length as `segment_urls`, when the
    /// manifest (or a test fixture) supplied them. Absent this, ABR
    /// strategies that want `S_b` fall back to a constant-bitrate estimate.
    pub segment_sizes: Option<Vec<u64>>,
}

/// A segment's position within a representation's segment list.
pub type SegmentIndex = usize;

#[derive(Debug, Clone)]
pub struct PlaybackCatalog {
    pub representations: Vec<Representation>,
    pub segment_duration_secs: f64,
    pub playback_duration_secs: f64,
    pub min_buffer_time_secs: f64,
}

impl PlaybackCatalog {
    /// Validates the invariants the rest of the crate relies on: at least one
    /// representation, no representation with an empty segment list, and
    /// every representation starting at the same play-out index (the
    /// scheduler assumes a single shared segment-index space across
    /// bitrates).
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.representations.is_empty() {
            return Err(ManifestError::NoRepresentations);
        }
        let first_start = self.representations[0].start;
        for rep in &self.representations {
            if rep.segment_urls.is_empty() {
                return Err(ManifestError::EmptySegmentList(rep.bandwidth_bps));
            }
            if rep.start != first_start {
                return Err(ManifestError::Malformed(format!(
                    "representation {} starts at index {} but others start at {first_start}",
                    rep.bandwidth_bps, rep.start
                )));
            }
        }
        Ok(())
    }

    /// The catalog-wide first segment index; every representation is
    /// required (by `validate`) to start at the same index.
    pub fn start(&self) -> usize {
        self.representations.first().map(|r| r.start).unwrap_or(0)
    }

    /// Bitrates of every representation, ascending.
    pub fn bitrates(&self) -> Vec<u64> {
        let mut rates: Vec<u64> = self.representations.iter().map(|r| r.bandwidth_bps).collect();
        rates.sort_unstable();
        rates
    }

    pub fn segment_count(&self) -> usize {
        self.representations
            .iter()
            .map(|r| r.segment_urls.len())
            .min()
            .unwrap_or(0)
    }

    pub fn representation_for_bitrate(&self, bitrate_bps: u64) -> Option<&Representation> {
        self.representations
            .iter()
            .find(|r| r.bandwidth_bps == bitrate_bps)
    }

    /// Average segment byte size for `bitrate`, used by the Netflix
    /// strategy's `avg_size[current_bitrate]` term. Falls back to a
    /// constant-bitrate estimate (`bitrate * segment_duration / 8`) when the
    /// representation carries no per-segment size vector.
    pub fn average_segment_size_bytes(&self, bitrate: u64) -> f64 {
        let Some(rep) = self.representation_for_bitrate(bitrate) else {
            return 0.0;
        };
        match rep.segment_sizes.as_ref().filter(|s| !s.is_empty()) {
            Some(sizes) => sizes.iter().sum::<u64>() as f64 / sizes.len() as f64,
            None => bitrate as f64 * self.segment_duration_secs / 8.0,
        }
    }

    /// The byte size of segment `index` at each bitrate in `bitrates` order,
    /// when *every* representation supplied per-segment sizes. `None` if
    /// any representation lacks them, so the Weighted/SARA strategy can
    /// fall back uniformly rather than mixing real and estimated sizes.
    pub fn segment_sizes_for_index(&self, index: usize, bitrates: &[u64]) -> Option<Vec<u64>> {
        let mut sizes = Vec::with_capacity(bitrates.len());
        for &bitrate in bitrates {
            let rep = self.representation_for_bitrate(bitrate)?;
            let local_index = index.checked_sub(rep.start)?;
            let size = *rep.segment_sizes.as_ref()?.get(local_index)?;
            sizes.push(size);
        }
        Some(sizes)
    }
}

/// Abstraction over manifest sources so tests can substitute a fixed catalog
/// without fetching or parsing real XML.
#[async_trait]
pub trait MpdSource: Send + Sync {
    async fn load(&self, url: &str) -> Result<PlaybackCatalog, ManifestError>;
}

/// Fetches an MPD manifest over HTTP and extracts the fields this crate
/// needs: per-`Representation` bandwidth and a static segment URL list built
/// from `BaseURL` + `SegmentList`/`SegmentURL` elements. Full ISO/IEC
/// 23009-1 coverage (multi-period timelines, `SegmentTemplate` expansion,
/// adaptation-set attribute inheritance) is out of scope.
pub struct HttpMpdSource {
    client: reqwest::Client,
}

impl HttpMpdSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MpdSource for HttpMpdSource {
    async fn load(&self, url: &str) -> Result<PlaybackCatalog, ManifestError> {
        let body = self.client.get(url).send().await?.text().await?;
        parse_mpd(&body)
    }
}

/// Parses the subset of DASH MPD XML this crate relies on into a
/// `PlaybackCatalog`. Public so it can be exercised directly in tests
/// without standing up an HTTP server.
pub fn parse_mpd(xml: &str) -> Result<PlaybackCatalog, ManifestError> {
    use quick_xml::events::Event;
    use quick_xml::reader::Reader;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text = true;

    let mut representations = Vec::new();
    let mut segment_duration_secs = 1.0_f64;
    let mut playback_duration_secs = 0.0_f64;
    let mut min_buffer_time_secs = 0.0_f64;

    let mut cur_bandwidth: Option<u64> = None;
    let mut cur_id: Option<String> = None;
    let mut cur_init_url: Option<String> = None;
    let mut cur_start = 1usize;
    let mut cur_urls: Vec<String> = Vec::new();
    let mut base_url = String::new();
    let mut in_base_url = false;

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let local = e.local_name();
                let name = std::str::from_utf8(local.as_ref()).unwrap_or_default();
                match name {
                    "MPD" => {
                        for attr in e.attributes().flatten() {
                            let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or_default();
                            let value = attr
                                .unescape_value()
                                .map(|v| v.into_owned())
                                .unwrap_or_default();
                            match key {
                                "mediaPresentationDuration" => {
                                    if let Some(d) = parse_iso8601_duration(&value) {
                                        playback_duration_secs = d;
                                    }
                                }
                                "minBufferTime" => {
                                    if let Some(d) = parse_iso8601_duration(&value) {
                                        min_buffer_time_secs = d;
                                    }
                                }
                                _ => {}
                            }
                        }
                    }
                    "Representation" => {
                        cur_bandwidth = None;
                        cur_id = None;
                        cur_init_url = None;
                        cur_start = 1;
                        cur_urls.clear();
                        for attr in e.attributes().flatten() {
                            let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or_default();
                            let value = attr
                                .unescape_value()
                                .map(|v| v.into_owned())
                                .unwrap_or_default();
                            match key {
                                "bandwidth" => {
                                    cur_bandwidth = value.parse::<u64>().ok();
                                }
                                "id" => cur_id = Some(value),
                                _ => {}
                            }
                        }
                    }
                    "Initialization" => {
                        for attr in e.attributes().flatten() {
                            let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or_default();
                            if key == "sourceURL" {
                                let value = attr
                                    .unescape_value()
                                    .map(|v| v.into_owned())
                                    .unwrap_or_default();
                                cur_init_url = Some(join_url(&base_url, &value));
                            }
                        }
                    }
                    "SegmentURL" => {
                        for attr in e.attributes().flatten() {
                            let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or_default();
                            if key == "media" {
                                let value = attr
                                    .unescape_value()
                                    .map(|v| v.into_owned())
                                    .unwrap_or_default();
                                cur_urls.push(value);
                            }
                        }
                    }
                    "SegmentList" => {
                        for attr in e.attributes().flatten() {
                            let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or_default();
                            let value = attr
                                .unescape_value()
                                .map(|v| v.into_owned())
                                .unwrap_or_default();
                            match key {
                                "duration" => {
                                    if let Ok(d) = value.parse::<f64>() {
                                        segment_duration_secs = d;
                                    }
                                }
                                "startNumber" => {
                                    if let Ok(n) = value.parse::<usize>() {
                                        cur_start = n;
                                    }
                                }
                                _ => {}
                            }
                        }
                    }
                    "BaseURL" => in_base_url = true,
                    _ => {}
                }
            }
            Ok(Event::Text(e)) if in_base_url => {
                base_url = e.unescape().unwrap_or_default().into_owned();
                in_base_url = false;
            }
            Ok(Event::End(ref e)) => {
                let local = e.local_name();
                let name = std::str::from_utf8(local.as_ref()).unwrap_or_default();
                if name == "Representation" {
                    let bandwidth = cur_bandwidth.ok_or_else(|| {
                        ManifestError::Malformed("Representation missing bandwidth".into())
                    })?;
                    let id = cur_id.clone().unwrap_or_else(|| bandwidth.to_string());
                    let urls = cur_urls
                        .iter()
                        .map(|u| join_url(&base_url, u))
                        .collect::<Vec<_>>();
                    representations.push(Representation {
                        id,
                        bandwidth_bps: bandwidth,
                        init_url: cur_init_url.clone(),
                        start: cur_start.saturating_sub(1),
                        segment_urls: urls,
                        segment_sizes: None,
                    });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ManifestError::Parse(e)),
            _ => {}
        }
        buf.clear();
    }

    let catalog = PlaybackCatalog {
        representations,
        segment_duration_secs,
        playback_duration_secs,
        min_buffer_time_secs,
    };
    catalog.validate()?;
    Ok(catalog)
}

fn join_url(base: &str, relative: &str) -> String {
    if relative.starts_with("http://") || relative.starts_with("https://") {
        relative.to_string()
    } else if base.is_empty() {
        relative.to_string()
    } else {
        format!("{}/{relative}", base.trim_end_matches('/'))
    }
}

/// Parses the `PT#H#M#S` subset of ISO 8601 durations MPD attributes use
/// (`mediaPresentationDuration`, `minBufferTime`). Unsupported forms
/// (date components, week designators) are treated as zero rather than
/// rejecting the whole manifest — these two fields are informational for
/// this crate's core loop, not load-bearing.
fn parse_iso8601_duration(value: &str) -> Option<f64> {
    let rest = value.strip_prefix('P')?;
    let time_part = rest.split('T').nth(1).unwrap_or("");

    let mut seconds = 0.0;
    let mut number = String::new();
    for c in time_part.chars() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let value: f64 = number.parse().unwrap_or(0.0);
        match c {
            'H' => seconds += value * 3600.0,
            'M' => seconds += value * 60.0,
            'S' => seconds += value,
            _ => {}
        }
        number.clear();
    }
    Some(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_MPD: &str = r#"
        <MPD>
          <Period>
            <AdaptationSet>
              <BaseURL>http://example.com/video/</BaseURL>
              <Representation id="lo" bandwidth="500000">
                <SegmentList duration="4">
                  <SegmentURL media="seg-1.m4s" />
                  <SegmentURL media="seg-2.m4s" />
                </SegmentList>
              </Representation>
              <Representation id="hi" bandwidth="2000000">
                <SegmentList duration="4">
                  <SegmentURL media="seg-1.m4s" />
                  <SegmentURL media="seg-2.m4s" />
                </SegmentList>
              </Representation>
            </AdaptationSet>
          </Period>
        </MPD>
    "#;

    #[test]
    fn parses_representations_and_segment_urls() {
        let catalog = parse_mpd(SAMPLE_MPD).unwrap();
        assert_eq!(catalog.representations.len(), 2);
        assert_eq!(catalog.bitrates(), vec![500_000, 2_000_000]);
        let hi = catalog.representation_for_bitrate(2_000_000).unwrap();
        assert_eq!(hi.segment_urls[0], "http://example.com/video/seg-1.m4s");
        assert_eq!(catalog.segment_duration_secs, 4.0);
    }

    #[test]
    fn average_segment_size_uses_known_sizes_when_present() {
        let mut catalog = parse_mpd(SAMPLE_MPD).unwrap();
        catalog.representations[0].segment_sizes = Some(vec![100_000, 200_000]);
        assert_eq!(catalog.average_segment_size_bytes(500_000), 150_000.0);
    }

    #[test]
    fn average_segment_size_falls_back_to_constant_bitrate_estimate() {
        let catalog = parse_mpd(SAMPLE_MPD).unwrap();
        // no per-segment sizes supplied by this fixture: falls back to
        // bitrate * duration / 8.
        assert_eq!(
            catalog.average_segment_size_bytes(500_000),
            500_000.0 * 4.0 / 8.0
        );
    }

    #[test]
    fn rejects_empty_manifest() {
        let err = parse_mpd("<MPD><Period><AdaptationSet/></Period></MPD>").unwrap_err();
        assert!(matches!(err, ManifestError::NoRepresentations));
    }

    #[test]
    fn rejects_representation_with_no_segments() {
        let xml = r#"<MPD><Period><AdaptationSet>
            <Representation id="lo" bandwidth="500000">
              <SegmentList duration="4" />
            </Representation>
        </AdaptationSet></Period></MPD>"#;
        let err = parse_mpd(xml).unwrap_err();
        assert!(matches!(err, ManifestError::EmptySegmentList(500_000)));
    }
}
