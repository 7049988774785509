//! C1: interns URI strings to small integer ids, and carries the closed
//! set of well-known URIs every other component dispatches on (port
//! classes, protocols, patch verbs, log levels), grounded on
//! `original_source/lib/synthpod_private.h`'s `reg_t` bucket layout.

use fnv::FnvHashMap;

use synthpod_plugin_api::Urid;

/// The well-known ids every session interns at startup, named after the
/// original's `reg_t` buckets.
#[derive(Debug, Clone, Copy)]
pub struct WellKnownUris {
    pub port_input: Urid,
    pub port_output: Urid,
    pub port_control: Urid,
    pub port_audio: Urid,
    pub port_cv: Urid,
    pub port_atom: Urid,
    pub port_sequence: Urid,

    pub port_integer: Urid,
    pub port_toggled: Urid,

    pub protocol_float: Urid,
    pub protocol_peak: Urid,
    pub protocol_atom_transfer: Urid,
    pub protocol_event_transfer: Urid,

    pub log_entry: Urid,
    pub log_error: Urid,
    pub log_note: Urid,
    pub log_trace: Urid,
    pub log_warning: Urid,

    pub patch_get: Urid,
    pub patch_set: Urid,
    pub patch_put: Urid,
    pub patch_patch: Urid,
    pub patch_insert: Urid,
    pub patch_delete: Urid,
    pub patch_move: Urid,
    pub patch_copy: Urid,
    pub patch_ack: Urid,
    pub patch_error: Urid,

    pub atom_int: Urid,
    pub atom_long: Urid,
    pub atom_float: Urid,
    pub atom_double: Urid,
    pub atom_bool: Urid,
    pub atom_urid: Urid,
    pub atom_string: Urid,
    pub atom_tuple: Urid,
    pub atom_object: Urid,
    pub atom_sequence: Urid,

    pub module_add: Urid,
    pub module_del: Urid,
    pub port_update: Urid,
    pub port_connect: Urid,
    pub port_disconnect: Urid,

    pub module_index: Urid,
    pub module_source_index: Urid,
    pub module_sink_index: Urid,
    pub port_index: Urid,
    pub port_source_index: Urid,
    pub port_sink_index: Urid,
    pub port_value: Urid,
    pub sequence_number: Urid,
}

const WELL_KNOWN_URI_LIST: &[&str] = &[
    "http://lv2plug.in/ns/lv2core#InputPort",
    "http://lv2plug.in/ns/lv2core#OutputPort",
    "http://lv2plug.in/ns/lv2core#ControlPort",
    "http://lv2plug.in/ns/lv2core#AudioPort",
    "http://lv2plug.in/ns/lv2core#CVPort",
    "http://lv2plug.in/ns/ext/atom#AtomPort",
    "http://lv2plug.in/ns/ext/atom#Sequence",
    "http://lv2plug.in/ns/lv2core#integer",
    "http://lv2plug.in/ns/lv2core#toggled",
    "http://lv2plug.in/ns/extensions/ui#floatProtocol",
    "http://lv2plug.in/ns/extensions/ui#peakProtocol",
    "http://lv2plug.in/ns/ext/atom#atomTransfer",
    "http://lv2plug.in/ns/ext/atom#eventTransfer",
    "http://lv2plug.in/ns/ext/log#Entry",
    "http://lv2plug.in/ns/ext/log#Error",
    "http://lv2plug.in/ns/ext/log#Note",
    "http://lv2plug.in/ns/ext/log#Trace",
    "http://lv2plug.in/ns/ext/log#Warning",
    "http://lv2plug.in/ns/ext/patch#Get",
    "http://lv2plug.in/ns/ext/patch#Set",
    "http://lv2plug.in/ns/ext/patch#Put",
    "http://lv2plug.in/ns/ext/patch#Patch",
    "http://lv2plug.in/ns/ext/patch#Insert",
    "http://lv2plug.in/ns/ext/patch#Delete",
    "http://lv2plug.in/ns/ext/patch#Move",
    "http://lv2plug.in/ns/ext/patch#Copy",
    "http://lv2plug.in/ns/ext/patch#Ack",
    "http://lv2plug.in/ns/ext/patch#Error",
    "http://lv2plug.in/ns/ext/atom#Int",
    "http://lv2plug.in/ns/ext/atom#Long",
    "http://lv2plug.in/ns/ext/atom#Float",
    "http://lv2plug.in/ns/ext/atom#Double",
    "http://lv2plug.in/ns/ext/atom#Bool",
    "http://lv2plug.in/ns/ext/atom#URID",
    "http://lv2plug.in/ns/ext/atom#String",
    "http://lv2plug.in/ns/ext/atom#Tuple",
    "http://lv2plug.in/ns/ext/atom#Object",
    "http://open-music-kontrollers.ch/synthpod#moduleAdd",
    "http://open-music-kontrollers.ch/synthpod#moduleDel",
    "http://open-music-kontrollers.ch/synthpod#portUpdate",
    "http://open-music-kontrollers.ch/synthpod#portConnect",
    "http://open-music-kontrollers.ch/synthpod#portDisconnect",
    "http://open-music-kontrollers.ch/synthpod#moduleIndex",
    "http://open-music-kontrollers.ch/synthpod#moduleSourceIndex",
    "http://open-music-kontrollers.ch/synthpod#moduleSinkIndex",
    "http://open-music-kontrollers.ch/synthpod#portIndex",
    "http://open-music-kontrollers.ch/synthpod#portSourceIndex",
    "http://open-music-kontrollers.ch/synthpod#portSinkIndex",
    "http://open-music-kontrollers.ch/synthpod#portValue",
    "http://open-music-kontrollers.ch/synthpod#sequenceNumber",
];

/// Interns URI strings to small integer ids (C1).
///
/// Mapping is stable for the life of the process: once minted, an id
/// never changes and is never reused. Id `0` is reserved ("none").
pub struct Registry {
    uri_to_id: FnvHashMap<String, Urid>,
    id_to_uri: Vec<String>,
    pub well_known: WellKnownUris,
}

impl Registry {
    /// Populates the well-known bucket from a static list, then returns
    /// the registry ready for use.
    pub fn bootstrap() -> Self {
        let mut uri_to_id = FnvHashMap::default();
        let mut id_to_uri = vec![String::new()]; // id 0 is reserved

        let mut mint = |uri: &str| -> Urid {
            if let Some(id) = uri_to_id.get(uri) {
                return *id;
            }
            let id = Urid::from_raw(id_to_uri.len() as u32);
            id_to_uri.push(uri.to_string());
            uri_to_id.insert(uri.to_string(), id);
            id
        };

        let mut ids = [Urid::NONE; WELL_KNOWN_URI_LIST.len()];
        for (i, uri) in WELL_KNOWN_URI_LIST.iter().enumerate() {
            ids[i] = mint(uri);
        }

        let well_known = WellKnownUris {
            port_input: ids[0],
            port_output: ids[1],
            port_control: ids[2],
            port_audio: ids[3],
            port_cv: ids[4],
            port_atom: ids[5],
            port_sequence: ids[6],
            port_integer: ids[7],
            port_toggled: ids[8],
            protocol_float: ids[9],
            protocol_peak: ids[10],
            protocol_atom_transfer: ids[11],
            protocol_event_transfer: ids[12],
            log_entry: ids[13],
            log_error: ids[14],
            log_note: ids[15],
            log_trace: ids[16],
            log_warning: ids[17],
            patch_get: ids[18],
            patch_set: ids[19],
            patch_put: ids[20],
            patch_patch: ids[21],
            patch_insert: ids[22],
            patch_delete: ids[23],
            patch_move: ids[24],
            patch_copy: ids[25],
            patch_ack: ids[26],
            patch_error: ids[27],
            atom_int: ids[28],
            atom_long: ids[29],
            atom_float: ids[30],
            atom_double: ids[31],
            atom_bool: ids[32],
            atom_urid: ids[33],
            atom_string: ids[34],
            atom_tuple: ids[35],
            atom_object: ids[36],
            atom_sequence: ids[6],
            module_add: ids[37],
            module_del: ids[38],
            port_update: ids[39],
            port_connect: ids[40],
            port_disconnect: ids[41],
            module_index: ids[42],
            module_source_index: ids[43],
            module_sink_index: ids[44],
            port_index: ids[45],
            port_source_index: ids[46],
            port_sink_index: ids[47],
            port_value: ids[48],
            sequence_number: ids[49],
        };

        Self {
            uri_to_id,
            id_to_uri,
            well_known,
        }
    }

    /// Interns `uri`, minting a new monotone id if it hasn't been seen
    /// before.
    pub fn map(&mut self, uri: &str) -> Urid {
        if let Some(id) = self.uri_to_id.get(uri) {
            return *id;
        }
        let id = Urid::from_raw(self.id_to_uri.len() as u32);
        self.id_to_uri.push(uri.to_string());
        self.uri_to_id.insert(uri.to_string(), id);
        id
    }

    /// Looks up the uri a previously-mapped id stands for.
    pub fn unmap(&self, id: Urid) -> Option<&str> {
        self.id_to_uri.get(id.get() as usize).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_assigns_non_none_ids() {
        let reg = Registry::bootstrap();
        assert!(!reg.well_known.port_audio.is_none());
        assert!(!reg.well_known.patch_set.is_none());
        assert_eq!(reg.well_known.atom_sequence, reg.well_known.port_sequence);
    }

    #[test]
    fn map_is_idempotent_and_monotone() {
        let mut reg = Registry::bootstrap();
        let a = reg.map("http://example.org/a");
        let b = reg.map("http://example.org/b");
        let a2 = reg.map("http://example.org/a");
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }

    #[test]
    fn unmap_round_trips() {
        let mut reg = Registry::bootstrap();
        let id = reg.map("http://example.org/thing");
        assert_eq!(reg.unmap(id), Some("http://example.org/thing"));
    }

    #[test]
    fn id_zero_is_reserved() {
        let reg = Registry::bootstrap();
        assert_eq!(reg.unmap(Urid::NONE), Some(""));
    }
}
