//! Common fixtures for radar tests.

/// Oklahoma City (Twin Lakes) WSR-88D.
pub mod ktlx {
    pub const ID: &str = "KTLX";
    pub const NAME: &str = "Oklahoma City, OK";
    pub const LATITUDE: f64 = 35.333;
    pub const LONGITUDE: f64 = -97.278;
    pub const ALTITUDE_M: f64 = 370.0;
}

/// A small site catalog in the bundled JSON layout.
pub const SAMPLE_CATALOG_JSON: &str = r#"[
  {"id": "KTLX", "name": "Oklahoma City, OK", "latitude": 35.333, "longitude": -97.278, "elevation_m": 370.0},
  {"id": "KFWS", "name": "Dallas/Fort Worth, TX", "latitude": 32.573, "longitude": -97.303, "elevation_m": 208.0},
  {"id": "KAMX", "name": "Miami, FL"}
]"#;

/// HTML index as served by bucket browsers, with absolute keys, sibling
/// metadata files and a parent link.
pub const BUCKET_BROWSER_LISTING: &str = r#"<html><body>
<a href="../">Parent Directory</a>
<a href="/2024/05/20/KTLX/KTLX20240520_220611_V06">KTLX20240520_220611_V06</a>
<a href="/2024/05/20/KTLX/KTLX20240520_221003_V06.gz">KTLX20240520_221003_V06.gz</a>
<a href="/2024/05/20/KTLX/KTLX20240520_221402_V06.gz">KTLX20240520_221402_V06.gz</a>
<a href="/2024/05/20/KTLX/KTLX20240520_221402_V06_MDM">KTLX20240520_221402_V06_MDM</a>
</body></html>"#;
