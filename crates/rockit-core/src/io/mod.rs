pub mod export;
pub mod ser;
pub mod ser_writer;

pub use export::{save_map_previews, save_plane_tiff, NamedMap, RockingCurvesReport};
pub use ser::{SerHeader, SerReader};
pub use ser_writer::{write_volume, SerWriter};
