//! World save serialization and disk I/O

use std::path::Path;

use log::debug;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

use crate::codec::rle::{self, Run};
use crate::codec::save::{ChunkSave, WorldSave};
use crate::core::error::Error;
use crate::core::types::{IVec3, Result};
use crate::voxel::chunk::{ChunkId, CHUNK_VOXELS};
use crate::voxel::material::VoxelMaterial;

/// File magic: "TVXS"
const MAGIC: [u8; 4] = *b"TVXS";
/// Format version
const VERSION: u32 = 1;

#[derive(Archive, Deserialize, Serialize)]
struct ValueRun {
    value: f32,
    len: u32,
}

#[derive(Archive, Deserialize, Serialize)]
struct MaterialRun {
    material: VoxelMaterial,
    len: u32,
}

/// Serializable chunk record with run-length encoded arrays
#[derive(Archive, Deserialize, Serialize)]
struct ChunkRecord {
    id: u64,
    x: i32,
    y: i32,
    z: i32,
    depth: u8,
    values: Vec<ValueRun>,
    materials: Vec<MaterialRun>,
}

#[derive(Archive, Deserialize, Serialize)]
struct SaveRecord {
    version: u32,
    depth: u8,
    chunks: Vec<ChunkRecord>,
}

fn to_record(chunk: &ChunkSave) -> ChunkRecord {
    ChunkRecord {
        id: chunk.id.0,
        x: chunk.position.x,
        y: chunk.position.y,
        z: chunk.position.z,
        depth: chunk.depth,
        values: rle::encode(&chunk.values)
            .into_iter()
            .map(|r| ValueRun { value: r.value, len: r.len })
            .collect(),
        materials: rle::encode(&chunk.materials)
            .into_iter()
            .map(|r| MaterialRun { material: r.value, len: r.len })
            .collect(),
    }
}

fn from_record(record: ChunkRecord) -> Result<ChunkSave> {
    let values: Vec<Run<f32>> = record.values.into_iter().map(|r| Run { value: r.value, len: r.len }).collect();
    let materials: Vec<Run<VoxelMaterial>> =
        record.materials.into_iter().map(|r| Run { value: r.material, len: r.len }).collect();

    // Check before expanding so a hostile run length cannot allocate
    if rle::decoded_len(&values) != CHUNK_VOXELS || rle::decoded_len(&materials) != CHUNK_VOXELS {
        return Err(Error::Codec(format!("chunk #{} does not expand to a full chunk", record.id)));
    }

    Ok(ChunkSave {
        id: ChunkId(record.id),
        position: IVec3::new(record.x, record.y, record.z),
        depth: record.depth,
        values: rle::decode(&values),
        materials: rle::decode(&materials),
    })
}

/// Serialize a save to bytes: magic, then LZ4-compressed rkyv archive.
pub fn encode_save(save: &WorldSave) -> Result<Vec<u8>> {
    let record = SaveRecord {
        version: VERSION,
        depth: save.depth,
        chunks: save.chunks.iter().map(to_record).collect(),
    };

    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&record).map_err(|e| Error::Codec(e.to_string()))?;

    let mut out = Vec::with_capacity(MAGIC.len() + bytes.len() / 2);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&lz4_flex::compress_prepend_size(&bytes));
    Ok(out)
}

/// Deserialize bytes produced by [`encode_save`].
pub fn decode_save(data: &[u8]) -> Result<WorldSave> {
    let Some(payload) = data.strip_prefix(&MAGIC) else {
        return Err(Error::Codec("missing save file magic".into()));
    };

    let decompressed = lz4_flex::decompress_size_prepended(payload)
        .map_err(|e| Error::Codec(format!("LZ4 decompression failed: {}", e)))?;

    // rkyv needs the archive aligned
    let mut aligned = AlignedVec::<16>::with_capacity(decompressed.len());
    aligned.extend_from_slice(&decompressed);

    let archived = rkyv::access::<ArchivedSaveRecord, rkyv::rancor::Error>(&aligned)
        .map_err(|e| Error::Codec(e.to_string()))?;
    let record: SaveRecord =
        rkyv::deserialize::<SaveRecord, rkyv::rancor::Error>(archived).map_err(|e| Error::Codec(e.to_string()))?;

    if record.version != VERSION {
        return Err(Error::Codec(format!("unsupported save version {}", record.version)));
    }

    let chunks = record.chunks.into_iter().map(from_record).collect::<Result<Vec<_>>>()?;
    Ok(WorldSave { depth: record.depth, chunks })
}

/// Write a save to `path`, creating parent directories.
pub async fn save_world(path: &Path, save: &WorldSave) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let bytes = encode_save(save)?;
    tokio::fs::write(path, &bytes).await?;
    debug!("Saved {} chunks ({} bytes) to {}", save.chunks.len(), bytes.len(), path.display());
    Ok(())
}

/// Read a save written by [`save_world`].
pub async fn load_world(path: &Path) -> Result<WorldSave> {
    let bytes = tokio::fs::read(path).await?;
    decode_save(&bytes)
}
