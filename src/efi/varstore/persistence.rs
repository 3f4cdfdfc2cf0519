//! Variable Store Persistence Layer
//!
//! This module reads store images from disk and writes them back. It bridges
//! the on-disk image format in [`edk2`](super::edk2) with the in-memory
//! [`Store`].
//!
//! # Storage Strategy
//!
//! - **Read**: the whole file is loaded, the headers decoded and the record
//!   stream walked; deleted records are dropped and duplicate keys resolve to
//!   the last record in file order.
//! - **Write**: the current store is merged with the additions and a complete
//!   image is assembled, written to a temporary file next to the destination,
//!   synced, and renamed over the destination.
//! - **Create**: like write with no variables, but never replaces an
//!   existing file.
//!
//! A crash mid-write leaves either the old image or the new one, never a
//! partially written file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::edk2::{self, HEADER_ALIGNMENT, RecordStream, VARIABLE_DATA_OFFSET};
use super::guard::{MachineState, assert_inactive};
use super::storage::FlashImage;
use super::{AuthenticatedVariable, Result, Store, StoreLayout, VarStoreError, document};

/// Read the store at `path`
///
/// Returns `Ok(None)` if no file exists there: the store is uninitialized,
/// which is not an error.
pub fn read<M: MachineState + ?Sized>(path: impl AsRef<Path>, machine: &M) -> Result<Option<Store>> {
    assert_inactive(machine)?;
    load(path.as_ref())
}

/// Create an empty store at `path` with the default OVMF layout
pub fn create_empty<M: MachineState + ?Sized>(path: impl AsRef<Path>, machine: &M) -> Result<()> {
    create_empty_with_layout(path, machine, &StoreLayout::default())
}

/// Create an empty store at `path`
///
/// Fails with `StoreExists` if anything already exists at `path`.
pub fn create_empty_with_layout<M: MachineState + ?Sized>(
    path: impl AsRef<Path>,
    machine: &M,
    layout: &StoreLayout,
) -> Result<()> {
    assert_inactive(machine)?;
    let path = path.as_ref();

    if path.try_exists()? {
        return Err(VarStoreError::StoreExists);
    }

    let image = assemble_image(layout, &Store::new())?;
    persist(path, image.as_bytes(), false)?;

    log::info!(
        "Created empty variable store {} ({} KB)",
        path.display(),
        layout.image_size / 1024
    );
    Ok(())
}

/// Merge `additions` into the store at `path` with the default OVMF layout
pub fn write<M: MachineState + ?Sized>(
    path: impl AsRef<Path>,
    machine: &M,
    additions: Vec<AuthenticatedVariable>,
) -> Result<()> {
    write_with_layout(path, machine, additions, &StoreLayout::default())
}

/// Merge `additions` into the store at `path` and rewrite the image
///
/// A missing file counts as an empty store. Additions replace existing
/// variables with the same (vendor, name).
pub fn write_with_layout<M: MachineState + ?Sized>(
    path: impl AsRef<Path>,
    machine: &M,
    additions: Vec<AuthenticatedVariable>,
    layout: &StoreLayout,
) -> Result<()> {
    assert_inactive(machine)?;
    let path = path.as_ref();

    let mut store = load(path)?.unwrap_or_default();
    let added = additions.len();
    store.merge(additions);

    let image = assemble_image(layout, &store)?;
    persist(path, image.as_bytes(), true)?;

    log::info!(
        "Wrote variable store {}: {} variables ({} added)",
        path.display(),
        store.len(),
        added
    );
    Ok(())
}

/// Load and decode the file at `path` without the machine check
fn load(path: &Path) -> Result<Option<Store>> {
    let image = match fs::read(path) {
        Ok(image) => image,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::debug!("No variable store at {}", path.display());
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    parse_image(&image).map(Some)
}

/// Decode the visible variables of a store image
pub fn parse_image(image: &[u8]) -> Result<Store> {
    let mut stream = RecordStream::new(image);
    edk2::decode_headers(&mut stream)?;

    let mut store = Store::new();
    let mut deleted = 0usize;

    while let Some(record) = edk2::decode_record(&mut stream)? {
        let variable = AuthenticatedVariable::load(record);
        if variable.is_deleted() {
            deleted += 1;
            continue;
        }
        if let Some(previous) = store.insert(variable) {
            log::debug!("Duplicate record for {:?} superseded", previous.name());
        }
    }

    log::debug!(
        "Variable store parsed: {} variables, {} deleted records, end at {:#x}",
        store.len(),
        deleted,
        stream.offset()
    );

    Ok(store)
}

/// Assemble a complete store image holding every variable of `store`
pub fn assemble_image(layout: &StoreLayout, store: &Store) -> Result<FlashImage> {
    layout.validate()?;

    let mut image = FlashImage::erased(layout.image_size as usize);
    image.write(0, &edk2::build_fv_headers(layout)?)?;
    image.write(
        layout.descriptor_offset as usize,
        &edk2::WORKING_BLOCK_DESCRIPTOR,
    )?;

    image.set_append_region(VARIABLE_DATA_OFFSET, layout.variable_region_size as usize);
    for variable in store.iter() {
        // Firmware reads names up to the first NUL
        if variable.name().contains('\0') {
            return Err(VarStoreError::InvalidName(variable.name().to_string()));
        }

        let record = edk2::encode_record(&variable.to_record());
        image.append(&record)?;
        image.pad_to_alignment(HEADER_ALIGNMENT);

        if (image.cursor() - VARIABLE_DATA_OFFSET) % HEADER_ALIGNMENT != 0 {
            log::error!(
                "Record {:?} left the write cursor unaligned at {:#x}",
                variable.name(),
                image.cursor()
            );
            return Err(VarStoreError::AlignmentInvariantViolated {
                offset: image.cursor(),
            });
        }
    }

    Ok(image)
}

/// Write `bytes` to `path` through a synced temporary file and a rename
fn persist(path: &Path, bytes: &[u8], overwrite: bool) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    if overwrite {
        // Keep the mode of the image being replaced
        if let Ok(metadata) = fs::metadata(path) {
            tmp.as_file().set_permissions(metadata.permissions())?;
        }
    }
    tmp.as_file().sync_all()?;

    if overwrite {
        tmp.persist(path).map_err(|e| VarStoreError::Io(e.error))?;
    } else {
        tmp.persist_noclobber(path).map_err(|e| {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                VarStoreError::StoreExists
            } else {
                VarStoreError::Io(e.error)
            }
        })?;
    }

    Ok(())
}

/// A store image at a fixed path, guarded by the state of its machine
pub struct EfiVars<M> {
    path: PathBuf,
    machine: M,
    layout: StoreLayout,
}

impl<M: MachineState> EfiVars<M> {
    /// Create a handle for the store at `path`
    pub fn new(path: impl Into<PathBuf>, machine: M) -> Self {
        Self {
            path: path.into(),
            machine,
            layout: StoreLayout::default(),
        }
    }

    /// Use a non-default image layout for created and rewritten images
    pub fn with_layout(mut self, layout: StoreLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Path of the store image
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current variables; `None` if the store does not exist
    pub fn read_content(&self) -> Result<Option<Store>> {
        read(&self.path, &self.machine)
    }

    /// Create an empty store image
    pub fn create_empty(&self) -> Result<()> {
        create_empty_with_layout(&self.path, &self.machine, &self.layout)
    }

    /// Merge variables into the store image
    pub fn write(&self, additions: Vec<AuthenticatedVariable>) -> Result<()> {
        write_with_layout(&self.path, &self.machine, additions, &self.layout)
    }

    /// Merge the variables of a JSON document into the store image
    pub fn import_document(&self, json: &str) -> Result<()> {
        assert_inactive(&self.machine)?;
        let additions = document::parse_document(json)?;
        self.write(additions)
    }

    /// Export the current variables as a JSON document
    pub fn export_document(&self) -> Result<Option<String>> {
        self.read_content()?
            .map(|store| document::to_json(&store))
            .transpose()
    }
}
