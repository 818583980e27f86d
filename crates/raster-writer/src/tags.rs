//! Provenance tags embedded in exported rasters.
//!
//! Tags are stored in the GDAL_METADATA TIFF tag (42112) as the small XML
//! document GDAL itself writes, so `gdalinfo` and rasterio show them as
//! dataset metadata:
//!
//! ```text
//! <GDALMetadata>
//!   <Item name="field">reflectivity</Item>
//!   <Item name="sweep">0</Item>
//! </GDALMetadata>
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

pub const TAG_FIELD: &str = "field";
pub const TAG_SWEEP: &str = "sweep";
pub const TAG_RADAR_LATITUDE: &str = "radar_latitude";
pub const TAG_RADAR_LONGITUDE: &str = "radar_longitude";
pub const TAG_SOURCE_FILENAME: &str = "source_filename";
pub const TAG_RESOLUTION: &str = "grid_resolution";
pub const TAG_PROCESSED_AT: &str = "processing_time";

/// Provenance written alongside every raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterTags {
    /// Radar field (moment) name, e.g. "reflectivity"
    pub field: String,
    /// Sweep index within the volume
    pub sweep: usize,
    pub radar_latitude: f64,
    pub radar_longitude: f64,
    /// Name of the volume file the raster was derived from
    pub source_filename: String,
    /// Grid cell size in meters
    pub resolution_m: f64,
    pub processed_at: DateTime<Utc>,
}

impl RasterTags {
    /// Flatten into name/value items.
    pub fn to_items(&self) -> BTreeMap<String, String> {
        let mut items = BTreeMap::new();
        items.insert(TAG_FIELD.to_string(), self.field.clone());
        items.insert(TAG_SWEEP.to_string(), self.sweep.to_string());
        items.insert(TAG_RADAR_LATITUDE.to_string(), self.radar_latitude.to_string());
        items.insert(TAG_RADAR_LONGITUDE.to_string(), self.radar_longitude.to_string());
        items.insert(TAG_SOURCE_FILENAME.to_string(), self.source_filename.clone());
        items.insert(TAG_RESOLUTION.to_string(), self.resolution_m.to_string());
        items.insert(
            TAG_PROCESSED_AT.to_string(),
            self.processed_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        );
        items
    }

    /// Rebuild from name/value items. Every tag must be present and parse.
    pub fn from_items(items: &BTreeMap<String, String>) -> Result<Self, String> {
        fn get<'a>(items: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str, String> {
            items
                .get(key)
                .map(String::as_str)
                .ok_or_else(|| format!("missing tag '{key}'"))
        }
        fn num<T: std::str::FromStr>(items: &BTreeMap<String, String>, key: &str) -> Result<T, String> {
            let raw = get(items, key)?;
            raw.parse()
                .map_err(|_| format!("tag '{key}' has invalid value '{raw}'"))
        }

        let processed_raw = get(items, TAG_PROCESSED_AT)?;
        let processed_at = DateTime::parse_from_rfc3339(processed_raw)
            .map_err(|e| format!("tag '{TAG_PROCESSED_AT}' is not RFC 3339: {e}"))?
            .with_timezone(&Utc);

        Ok(Self {
            field: get(items, TAG_FIELD)?.to_string(),
            sweep: num(items, TAG_SWEEP)?,
            radar_latitude: num(items, TAG_RADAR_LATITUDE)?,
            radar_longitude: num(items, TAG_RADAR_LONGITUDE)?,
            source_filename: get(items, TAG_SOURCE_FILENAME)?.to_string(),
            resolution_m: num(items, TAG_RESOLUTION)?,
            processed_at,
        })
    }

    /// Serialize as a GDALMetadata XML document.
    pub fn to_gdal_metadata(&self) -> String {
        let mut xml = String::from("<GDALMetadata>\n");
        for (name, value) in self.to_items() {
            xml.push_str(&format!(
                "  <Item name=\"{}\">{}</Item>\n",
                escape(name.as_str()),
                escape(value.as_str())
            ));
        }
        xml.push_str("</GDALMetadata>");
        xml
    }

    /// Parse a GDALMetadata XML document.
    pub fn from_gdal_metadata(xml: &str) -> Result<Self, String> {
        Self::from_items(&parse_gdal_items(xml)?)
    }
}

/// Collect `<Item name="...">value</Item>` pairs. Band-scoped items (those
/// with a `sample` attribute) are ignored.
pub fn parse_gdal_items(xml: &str) -> Result<BTreeMap<String, String>, String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut items = BTreeMap::new();
    let mut current: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"Item" => {
                let mut name = None;
                let mut band_scoped = false;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"name" => {
                            name = Some(
                                attr.unescape_value()
                                    .map_err(|e| e.to_string())?
                                    .into_owned(),
                            )
                        }
                        b"sample" => band_scoped = true,
                        _ => {}
                    }
                }
                current = if band_scoped { None } else { name };
                text.clear();
            }
            Ok(Event::Text(t)) if current.is_some() => {
                text.push_str(&t.unescape().map_err(|e| e.to_string())?);
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"Item" => {
                if let Some(name) = current.take() {
                    items.insert(name, std::mem::take(&mut text));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("invalid GDAL metadata XML: {e}")),
            _ => {}
        }
        buf.clear();
    }

    Ok(items)
}
