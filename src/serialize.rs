//! Serde helpers for fixed-size arrays plus the versioned save-state blob.

use crate::cpu::CpuRegisters;
use crate::memory::Bus;
use serde::de::{SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::Formatter;
use std::marker::PhantomData;
use thiserror::Error;

/// Bumped whenever the save-state layout changes; loads reject mismatches.
pub const SAVE_STATE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SaveStateError {
    #[error("error serializing/deserializing state: {source}")]
    Serialization {
        #[from]
        source: bincode::Error,
    },
    #[error("save state is version {actual}, expected version {expected}")]
    VersionMismatch { expected: u32, actual: u32 },
    #[error("save state is truncated: {len} bytes")]
    Truncated { len: usize },
}

pub fn serialize_array<S, T, const N: usize>(
    array: &[T; N],
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Serialize,
{
    let mut state = serializer.serialize_tuple(N)?;
    for value in array {
        state.serialize_element(value)?;
    }
    state.end()
}

struct DeserializeArrayVisitor<T, const N: usize> {
    marker: PhantomData<T>,
}

impl<T, const N: usize> DeserializeArrayVisitor<T, N> {
    fn new() -> Self {
        Self { marker: PhantomData }
    }
}

impl<'de, T, const N: usize> Visitor<'de> for DeserializeArrayVisitor<T, N>
where
    T: Deserialize<'de> + Default + Copy,
{
    type Value = [T; N];

    fn expecting(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "an array of size {N}")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut array = [T::default(); N];

        for (i, value) in array.iter_mut().enumerate() {
            let Some(elem) = seq.next_element()? else {
                return Err(de::Error::custom(format!(
                    "expected array to have {N} elements, only got {i}",
                )));
            };

            *value = elem;
        }

        if seq.next_element::<T>()?.is_some() {
            return Err(de::Error::custom(format!("array has more than {N} elements",)));
        }

        Ok(array)
    }
}

pub fn deserialize_array<'de, D, T, const N: usize>(deserializer: D) -> Result<[T; N], D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default + Copy,
{
    deserializer.deserialize_tuple(N, DeserializeArrayVisitor::new())
}

#[allow(clippy::borrowed_box)]
pub fn serialize_boxed_array<S, T, const N: usize>(
    array: &Box<[T; N]>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Serialize,
{
    serialize_array(array, serializer)
}

pub fn deserialize_boxed_array<'de, D, T, const N: usize>(
    deserializer: D,
) -> Result<Box<[T; N]>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default + Copy,
{
    deserialize_array(deserializer).map(Box::new)
}

/// Serialize the full emulation state into a versioned binary blob. The
/// clocks still owed by the in-flight instruction are captured so that a
/// restored state resumes on the exact same machine cycle.
pub fn save_state(
    cpu_registers: &CpuRegisters,
    bus: &Bus,
    pending_clocks: u32,
) -> Result<Vec<u8>, SaveStateError> {
    let mut bytes = bincode::serialize(&SAVE_STATE_VERSION)?;
    bytes.extend(bincode::serialize(&(cpu_registers, bus, pending_clocks))?);

    log::info!("Serialized save state ({} bytes)", bytes.len());

    Ok(bytes)
}

/// Deserialize a save-state blob produced by [`save_state`]. A version
/// mismatch fails cleanly without producing any state.
pub fn load_state(bytes: &[u8]) -> Result<(CpuRegisters, Bus, u32), SaveStateError> {
    if bytes.len() < 4 {
        return Err(SaveStateError::Truncated { len: bytes.len() });
    }

    let version: u32 = bincode::deserialize(&bytes[..4])?;
    if version != SAVE_STATE_VERSION {
        return Err(SaveStateError::VersionMismatch {
            expected: SAVE_STATE_VERSION,
            actual: version,
        });
    }

    let state = bincode::deserialize(&bytes[4..])?;

    log::info!("Deserialized save state ({} bytes)", bytes.len());

    Ok(state)
}
