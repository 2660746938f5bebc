//! ESRI world files.

use std::path::Path;

use sector_common::ExportResult;

use crate::types::Georeference;

/// Render the six lines of a world file.
///
/// Pixel sizes keep 17 fractional digits and the origin 15. The rotation
/// terms are always zero. The origin is the top-left corner of the raster,
/// as stored in [`Georeference`].
pub fn world_file_contents(geo: &Georeference) -> String {
    format!(
        "{:.17}\n0\n0\n{:.17}\n{:.15}\n{:.15}\n",
        geo.pixel_size_lon, geo.pixel_size_lat, geo.origin_lon, geo.origin_lat
    )
}

/// Write a world file to `path`.
pub fn write_world_file(path: &Path, geo: &Georeference) -> ExportResult<()> {
    std::fs::write(path, world_file_contents(geo))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sector_common::Sector;

    #[test]
    fn test_world_file_lines() {
        let geo = Georeference::for_sector(&Sector::new(0.0, 1.0, 10.0, 12.0), 4, 2);
        let text = world_file_contents(&geo);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "0.50000000000000000");
        assert_eq!(lines[1], "0");
        assert_eq!(lines[2], "0");
        assert_eq!(lines[3], "-0.50000000000000000");
        assert_eq!(lines[4], "10.000000000000000");
        assert_eq!(lines[5], "1.000000000000000");
    }

    #[test]
    fn test_write_world_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0_0.jgw");
        let geo = Georeference::for_sector(&Sector::new(0.0, 1.0, 0.0, 1.0), 10, 10);

        write_world_file(&path, &geo).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("0.10000000000000001\n"));
    }
}
