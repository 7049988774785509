use crate::urid::Urid;

/// The description of a plugin class, as answered by the catalog.
///
/// eg: uri = "http://open-music-kontrollers.ch/lv2/synthpod#stereo",
/// name = "Stereo", vendor = "Open Music Kontrollers"
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub uri: String,
    pub name: String,
    pub vendor: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// The four port types the spec recognizes. Audio and CV are electrically
/// identical (period-sized float buffers) but are never connectable to
/// each other (§3 Connection invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    Control,
    Audio,
    Cv,
    Atom,
}

/// Whether an atom port carries a `Sequence`-typed buffer. Control/audio/
/// CV ports always report `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortBufferType {
    None,
    Sequence,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalePoint {
    pub label_index: u32,
    pub value: f32,
}

/// Range/scale/unit metadata for a control port, read once at module
/// construction time and never mutated afterward.
#[derive(Debug, Clone, Default)]
pub struct ControlPortHints {
    pub default: f32,
    pub min: f32,
    pub max: f32,
    pub is_integer: bool,
    pub is_toggled: bool,
    pub is_logarithmic: bool,
    pub scale_points: Vec<ScalePoint>,
    pub unit: Option<Urid>,
}

/// One port declared by a plugin class, as answered by the catalog for a
/// given `(uri, index)`.
#[derive(Debug, Clone)]
pub struct PortDescriptor {
    pub index: u32,
    pub symbol: String,
    pub name: String,
    pub direction: PortDirection,
    pub port_type: PortType,
    pub buffer_type: PortBufferType,
    pub control_hints: Option<ControlPortHints>,
    /// Well-known designation (e.g. "this is the left channel of the
    /// main stereo output"), opaque to the core beyond display purposes.
    pub designation: Option<Urid>,
}
