//! Minimal vector tile writer for tests.

#![allow(dead_code)]

#[derive(Debug, Clone)]
pub enum TestValue {
    String(String),
    Double(f64),
    Int(i64),
    UInt(u64),
    Bool(bool),
}

/// Geometry in tile extent units, `y` pointing down.
#[derive(Debug, Clone)]
pub enum TestGeometry {
    Points(Vec<(i32, i32)>),
    Lines(Vec<Vec<(i32, i32)>>),
    /// Rings without the closing point. Exterior rings are clockwise.
    Polygon(Vec<Vec<(i32, i32)>>),
    /// Geometry type and command integers written as given, valid or not.
    Raw(u64, Vec<u32>),
}

pub struct LayerBuilder {
    name: String,
    extent: u32,
    keys: Vec<String>,
    values: Vec<Vec<u8>>,
    features: Vec<Vec<u8>>,
}

impl LayerBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            extent: 4096,
            keys: Vec::new(),
            values: Vec::new(),
            features: Vec::new(),
        }
    }

    pub fn extent(mut self, extent: u32) -> Self {
        self.extent = extent;
        self
    }

    pub fn feature(
        mut self,
        id: Option<u64>,
        geometry: TestGeometry,
        properties: &[(&str, TestValue)],
    ) -> Self {
        let mut tags = Vec::new();
        for (key, value) in properties {
            let key_index = match self.keys.iter().position(|k| k == key) {
                Some(index) => index,
                None => {
                    self.keys.push((*key).to_owned());
                    self.keys.len() - 1
                }
            };
            self.values.push(encode_value(value));
            write_varint(&mut tags, key_index as u64);
            write_varint(&mut tags, (self.values.len() - 1) as u64);
        }

        let (kind, commands) = encode_geometry(&geometry);
        let mut feature = Vec::new();
        if let Some(id) = id {
            write_key(&mut feature, 1, 0);
            write_varint(&mut feature, id);
        }
        write_bytes(&mut feature, 2, &tags);
        write_key(&mut feature, 3, 0);
        write_varint(&mut feature, kind);
        let mut packed = Vec::new();
        for command in commands {
            write_varint(&mut packed, command as u64);
        }
        write_bytes(&mut feature, 4, &packed);

        self.features.push(feature);
        self
    }

    fn encode(&self) -> Vec<u8> {
        let mut layer = Vec::new();
        write_key(&mut layer, 15, 0);
        write_varint(&mut layer, 2);
        write_bytes(&mut layer, 1, self.name.as_bytes());
        for feature in &self.features {
            write_bytes(&mut layer, 2, feature);
        }
        for key in &self.keys {
            write_bytes(&mut layer, 3, key.as_bytes());
        }
        for value in &self.values {
            write_bytes(&mut layer, 4, value);
        }
        write_key(&mut layer, 5, 0);
        write_varint(&mut layer, self.extent as u64);
        layer
    }
}

#[derive(Default)]
pub struct TileBuilder {
    layers: Vec<LayerBuilder>,
}

impl TileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layer(mut self, layer: LayerBuilder) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut tile = Vec::new();
        for layer in &self.layers {
            write_bytes(&mut tile, 3, &layer.encode());
        }
        tile
    }
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn write_key(out: &mut Vec<u8>, field: u32, wire_type: u32) {
    write_varint(out, ((field << 3) | wire_type) as u64);
}

fn write_bytes(out: &mut Vec<u8>, field: u32, bytes: &[u8]) {
    write_key(out, field, 2);
    write_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

fn zigzag(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

fn encode_value(value: &TestValue) -> Vec<u8> {
    let mut out = Vec::new();
    match value {
        TestValue::String(s) => write_bytes(&mut out, 1, s.as_bytes()),
        TestValue::Double(d) => {
            write_key(&mut out, 3, 1);
            out.extend_from_slice(&d.to_le_bytes());
        }
        TestValue::Int(i) => {
            write_key(&mut out, 4, 0);
            write_varint(&mut out, *i as u64);
        }
        TestValue::UInt(u) => {
            write_key(&mut out, 5, 0);
            write_varint(&mut out, *u);
        }
        TestValue::Bool(b) => {
            write_key(&mut out, 7, 0);
            write_varint(&mut out, *b as u64);
        }
    }
    out
}

fn encode_geometry(geometry: &TestGeometry) -> (u64, Vec<u32>) {
    let mut commands = Vec::new();
    let mut cursor = (0, 0);
    let mut push = |commands: &mut Vec<u32>, (x, y): (i32, i32)| {
        commands.push(zigzag(x - cursor.0));
        commands.push(zigzag(y - cursor.1));
        cursor = (x, y);
    };

    match geometry {
        TestGeometry::Points(points) => {
            commands.push(command(1, points.len()));
            for point in points {
                push(&mut commands, *point);
            }
            (1, commands)
        }
        TestGeometry::Lines(lines) => {
            for line in lines {
                commands.push(command(1, 1));
                push(&mut commands, line[0]);
                commands.push(command(2, line.len() - 1));
                for point in &line[1..] {
                    push(&mut commands, *point);
                }
            }
            (2, commands)
        }
        TestGeometry::Polygon(rings) => {
            for ring in rings {
                commands.push(command(1, 1));
                push(&mut commands, ring[0]);
                commands.push(command(2, ring.len() - 1));
                for point in &ring[1..] {
                    push(&mut commands, *point);
                }
                commands.push(command(7, 1));
            }
            (3, commands)
        }
        TestGeometry::Raw(kind, raw) => (*kind, raw.clone()),
    }
}

/// Command integer: `id` 1 is MoveTo, 2 LineTo and 7 ClosePath.
pub /// Square exterior ring at `(x, y)` with side `size`.
pub fn square(x: i32, y: i32, size: i32) -> Vec<(i32, i32)> {
    vec![(x, y), (x + size, y), (x + size, y + size), (x, y + size)]
}
