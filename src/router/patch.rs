//! Object-atom encode/decode for patch verbs and the well-known
//! app↔UI messages (§6 "Patch verbs", "Well-known messages"). The
//! physical `{size, type}` framing is `synthpod_plugin_api::atom`;
//! this module owns the host-specific meaning of an `atom:Object`'s
//! `otype` and its `{key, value}` properties.

use synthpod_plugin_api::atom::{pad_size, AtomHeader};
use synthpod_plugin_api::Urid;

use crate::registry::Registry;

/// A decoded property value. Only the scalar kinds the router needs to
/// shuttle across the ring are modelled; plugin-private atom payloads
/// pass through as `Raw` untouched (§4.7 "Unknown verbs are passed
/// through").
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f32),
    Urid(Urid),
    String(String),
    Raw(Urid, Vec<u8>),
}

impl Value {
    fn type_urid(&self, reg: &Registry) -> Urid {
        match self {
            Value::Int(_) => reg.well_known.atom_int,
            Value::Float(_) => reg.well_known.atom_float,
            Value::Urid(_) => reg.well_known.atom_urid,
            Value::String(_) => reg.well_known.atom_string,
            Value::Raw(t, _) => *t,
        }
    }

    fn body(&self) -> Vec<u8> {
        match self {
            Value::Int(v) => v.to_ne_bytes().to_vec(),
            Value::Float(v) => v.to_ne_bytes().to_vec(),
            Value::Urid(v) => v.get().to_ne_bytes().to_vec(),
            Value::String(v) => v.as_bytes().to_vec(),
            Value::Raw(_, b) => b.clone(),
        }
    }

    fn decode(reg: &Registry, type_urid: Urid, body: &[u8]) -> Option<Value> {
        let wk = &reg.well_known;
        if type_urid == wk.atom_int {
            Some(Value::Int(i32::from_ne_bytes(body.try_into().ok()?)))
        } else if type_urid == wk.atom_float {
            Some(Value::Float(f32::from_ne_bytes(body.try_into().ok()?)))
        } else if type_urid == wk.atom_urid {
            Some(Value::Urid(Urid::from_raw(u32::from_ne_bytes(
                body.try_into().ok()?,
            ))))
        } else if type_urid == wk.atom_string {
            Some(Value::String(String::from_utf8(body.to_vec()).ok()?))
        } else {
            Some(Value::Raw(type_urid, body.to_vec()))
        }
    }
}

/// One `{key, value}` pair inside an `atom:Object` body (§6: the
/// `context`-urid companion LV2 defines is always `NONE` here, this
/// host never uses accessor contexts).
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub key: Urid,
    pub value: Value,
}

/// A fully decoded patch Object: the verb (`otype`) plus its
/// properties (§6 "Patch verbs" table).
#[derive(Debug, Clone, PartialEq)]
pub struct PatchObject {
    pub otype: Urid,
    pub id: Urid,
    pub properties: Vec<Property>,
}

impl PatchObject {
    pub fn get(&self, key: Urid) -> Option<&Value> {
        self.properties.iter().find(|p| p.key == key).map(|p| &p.value)
    }

    /// Encodes as a padded `atom:Object`: `{id, otype}` followed by a
    /// run of `{key, context=NONE, value-atom}` triples.
    pub fn encode(&self, reg: &Registry) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.id.get().to_ne_bytes());
        body.extend_from_slice(&self.otype.get().to_ne_bytes());

        for prop in &self.properties {
            body.extend_from_slice(&prop.key.get().to_ne_bytes());
            body.extend_from_slice(&Urid::NONE.get().to_ne_bytes()); // context
            let value_type = prop.value.type_urid(reg);
            let value_body = prop.value.body();
            let header = AtomHeader {
                size: value_body.len() as u32,
                atom_type: value_type,
            };
            let mut header_bytes = [0u8; AtomHeader::SIZE];
            header.write(&mut header_bytes);
            body.extend_from_slice(&header_bytes);
            body.extend_from_slice(&value_body);
            body.resize(pad_size(body.len()), 0);
        }

        let mut out = vec![0u8; AtomHeader::SIZE];
        AtomHeader {
            size: body.len() as u32,
            atom_type: reg.well_known.atom_object,
        }
        .write(&mut out);
        out.extend_from_slice(&body);
        out
    }

    /// Decodes a buffer starting at an `atom:Object` header.
    pub fn decode(reg: &Registry, buf: &[u8]) -> Option<PatchObject> {
        let header = AtomHeader::read(buf)?;
        if header.atom_type != reg.well_known.atom_object {
            return None;
        }
        let body = &buf[AtomHeader::SIZE..AtomHeader::SIZE + header.size as usize];
        if body.len() < 8 {
            return None;
        }
        let id = Urid::from_raw(u32::from_ne_bytes(body[0..4].try_into().ok()?));
        let otype = Urid::from_raw(u32::from_ne_bytes(body[4..8].try_into().ok()?));

        let mut properties = Vec::new();
        let mut offset = 8;
        while offset + 8 + AtomHeader::SIZE <= body.len() {
            let key = Urid::from_raw(u32::from_ne_bytes(body[offset..offset + 4].try_into().ok()?));
            // context urid at offset+4..offset+8 is always NONE, skipped.
            let value_off = offset + 8;
            let value_header = AtomHeader::read(&body[value_off..])?;
            let value_body_off = value_off + AtomHeader::SIZE;
            let value_body_end = value_body_off + value_header.size as usize;
            if value_body_end > body.len() {
                break;
            }
            let value = Value::decode(reg, value_header.atom_type, &body[value_body_off..value_body_end])?;
            properties.push(Property { key, value });

            let advance = 8 + value_header.padded_total();
            offset += advance;
        }

        Some(PatchObject { otype, id, properties })
    }
}
