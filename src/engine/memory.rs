// Paged State Container
use bitvec::prelude::*;
use memmap2::{MmapMut, MmapOptions};
use std::fs::File;
use std::ops::{Index, IndexMut};
use std::path::Path;

use crate::config::Complex;
use crate::engine::kernels::{FlatView, PagedView};
use crate::error::Result;

const AMPLITUDE_BYTES: usize = std::mem::size_of::<Complex>();

/// Identifies one page of one data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId {
    pub data_block: usize,
    pub page: usize,
}

impl PageId {
    pub const fn new(data_block: usize, page: usize) -> Self {
        Self { data_block, page }
    }
}

/// Where the scratch region used by swaps and exchanges lives.
enum Scratch {
    /// Paged layout: one spare chunk of the mapping, rotated by `swap_buffer_and_page`.
    Chunk(usize),
    /// Flat layout: a heap buffer grown on first use.
    Detached(Vec<Complex>),
}

/// Owns the local slice of the amplitude vector.
///
/// The mapping holds `num_data_blocks * num_pages` live chunks plus one scratch
/// chunk when paging is enabled. The page table maps `(data_block, page)` to a
/// chunk, so whole pages swap by exchanging table entries. With zero page
/// qubits every data block is one chunk and there is no scratch chunk.
pub struct PagedStateVector {
    mapping: MmapMut,
    _file: Option<File>, // Keep file handle open
    num_local_qubits: usize,
    num_page_qubits: usize,
    num_data_blocks: usize,
    offset_bits: usize,
    offset_mask: usize,
    page_table: Vec<usize>,
    scratch: Scratch,
    live_chunks: BitVec, // Chunks currently referenced by the page table
}

// The mapping is only reached through &self / &mut self.
unsafe impl Send for PagedStateVector {}
unsafe impl Sync for PagedStateVector {}

impl PagedStateVector {
    /// Allocates a zeroed container, in anonymous memory or on `backing_store`.
    pub fn new(
        num_local_qubits: usize,
        num_page_qubits: usize,
        num_data_blocks: usize,
        backing_store: Option<&Path>,
    ) -> Result<Self> {
        let offset_bits = num_local_qubits - num_page_qubits;
        let page_size = 1usize << offset_bits;
        let num_pages = 1usize << num_page_qubits;
        let paged = num_page_qubits > 0;
        let num_chunks = num_data_blocks * num_pages + usize::from(paged);
        let total_bytes = num_chunks * page_size * AMPLITUDE_BYTES;

        let (mapping, file) = match backing_store {
            Some(path) => {
                let file = File::options()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)?;
                // Pre-allocate disk space; a fresh file reads back as zeros
                file.set_len(total_bytes as u64)?;
                // Safety: the file is created for this container and not shared
                let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
                (mmap, Some(file))
            }
            None => (MmapOptions::new().len(total_bytes).map_anon()?, None),
        };
        // Page-table indirection makes access patterns non-sequential
        unsafe {
            libc::madvise(
                mapping.as_ptr() as *mut _,
                total_bytes,
                libc::MADV_RANDOM,
            );
        }

        let num_live = num_data_blocks * num_pages;
        let mut live_chunks = bitvec![0; num_chunks];
        live_chunks[..num_live].fill(true);

        Ok(Self {
            mapping,
            _file: file,
            num_local_qubits,
            num_page_qubits,
            num_data_blocks,
            offset_bits,
            offset_mask: page_size - 1,
            page_table: (0..num_live).collect(),
            scratch: if paged {
                Scratch::Chunk(num_live)
            } else {
                Scratch::Detached(Vec::new())
            },
            live_chunks,
        })
    }

    pub fn num_local_qubits(&self) -> usize {
        self.num_local_qubits
    }

    pub fn num_page_qubits(&self) -> usize {
        self.num_page_qubits
    }

    pub fn num_pages(&self) -> usize {
        1 << self.num_page_qubits
    }

    pub fn num_data_blocks(&self) -> usize {
        self.num_data_blocks
    }

    /// Number of in-page offset bits; page qubits start at this slot.
    pub fn offset_bits(&self) -> usize {
        self.offset_bits
    }

    pub fn page_size(&self) -> usize {
        1 << self.offset_bits
    }

    pub fn is_paged(&self) -> bool {
        self.num_page_qubits > 0
    }

    /// Live amplitudes held by this rank.
    pub fn len(&self) -> usize {
        self.num_data_blocks << self.num_local_qubits
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Amplitudes the mapping can hold, scratch chunk included.
    pub fn capacity(&self) -> usize {
        self.live_chunks.len() * self.page_size()
    }

    fn raw(&self) -> &[Complex] {
        // Safety: mmap is page aligned and sized to a whole number of chunks
        unsafe {
            std::slice::from_raw_parts(
                self.mapping.as_ptr() as *const Complex,
                self.mapping.len() / AMPLITUDE_BYTES,
            )
        }
    }

    fn raw_mut(&mut self) -> &mut [Complex] {
        unsafe {
            std::slice::from_raw_parts_mut(
                self.mapping.as_mut_ptr() as *mut Complex,
                self.mapping.len() / AMPLITUDE_BYTES,
            )
        }
    }

    fn chunk_of(&self, id: PageId) -> usize {
        debug_assert!(id.data_block < self.num_data_blocks && id.page < self.num_pages());
        self.page_table[(id.data_block << self.num_page_qubits) | id.page]
    }

    fn chunk(&self, chunk: usize) -> &[Complex] {
        let size = self.page_size();
        &self.raw()[chunk * size..(chunk + 1) * size]
    }

    fn chunk_mut(&mut self, chunk: usize) -> &mut [Complex] {
        let size = self.page_size();
        &mut self.raw_mut()[chunk * size..(chunk + 1) * size]
    }

    /// Two distinct chunks borrowed mutably at once.
    fn chunk_pair_mut(&mut self, a: usize, b: usize) -> (&mut [Complex], &mut [Complex]) {
        debug_assert_ne!(a, b);
        let size = self.page_size();
        let raw = self.raw_mut();
        if a < b {
            let (lo, hi) = raw.split_at_mut(b * size);
            (&mut lo[a * size..(a + 1) * size], &mut hi[..size])
        } else {
            let (lo, hi) = raw.split_at_mut(a * size);
            (&mut hi[..size], &mut lo[b * size..(b + 1) * size])
        }
    }

    pub fn page_range(&self, id: PageId) -> &[Complex] {
        self.chunk(self.chunk_of(id))
    }

    pub fn page_range_mut(&mut self, id: PageId) -> &mut [Complex] {
        let chunk = self.chunk_of(id);
        self.chunk_mut(chunk)
    }

    /// Two different pages of the container, mutably.
    pub fn page_pair_mut(&mut self, a: PageId, b: PageId) -> (&mut [Complex], &mut [Complex]) {
        let (ca, cb) = (self.chunk_of(a), self.chunk_of(b));
        self.chunk_pair_mut(ca, cb)
    }

    /// The scratch region. It never holds live data between operations.
    pub fn buffer_range(&self) -> &[Complex] {
        match &self.scratch {
            Scratch::Chunk(chunk) => self.chunk(*chunk),
            Scratch::Detached(buffer) => buffer,
        }
    }

    pub fn buffer_range_mut(&mut self) -> &mut [Complex] {
        if let Scratch::Chunk(chunk) = self.scratch {
            return self.chunk_mut(chunk);
        }
        match &mut self.scratch {
            Scratch::Detached(buffer) => buffer.as_mut_slice(),
            Scratch::Chunk(_) => &mut [],
        }
    }

    /// A page together with a scratch region of at least `min_len` amplitudes.
    pub fn page_and_buffer_mut(
        &mut self,
        id: PageId,
        min_len: usize,
    ) -> (&mut [Complex], &mut [Complex]) {
        let page = self.chunk_of(id);
        if let Scratch::Chunk(buffer) = self.scratch {
            return self.chunk_pair_mut(page, buffer);
        }
        match &mut self.scratch {
            Scratch::Detached(buffer) => {
                if buffer.len() < min_len {
                    buffer.resize(min_len, Complex::new(0.0, 0.0));
                }
                let size = 1usize << self.offset_bits;
                // Safety: the detached buffer is a separate heap allocation
                let raw = unsafe {
                    std::slice::from_raw_parts_mut(
                        self.mapping.as_mut_ptr() as *mut Complex,
                        self.mapping.len() / AMPLITUDE_BYTES,
                    )
                };
                (&mut raw[page * size..(page + 1) * size], &mut buffer[..])
            }
            Scratch::Chunk(_) => (&mut [], &mut []),
        }
    }

    /// Exchanges two pages by swapping their page-table entries.
    pub fn swap_pages(&mut self, a: PageId, b: PageId) {
        let ia = (a.data_block << self.num_page_qubits) | a.page;
        let ib = (b.data_block << self.num_page_qubits) | b.page;
        self.page_table.swap(ia, ib);
    }

    /// Makes the scratch chunk the new page `id`; the old page becomes scratch.
    pub fn swap_buffer_and_page(&mut self, id: PageId) {
        debug_assert!(matches!(self.scratch, Scratch::Chunk(_)));
        let index = (id.data_block << self.num_page_qubits) | id.page;
        if let Scratch::Chunk(buffer) = &mut self.scratch {
            let old_page = self.page_table[index];
            self.page_table[index] = *buffer;
            self.live_chunks.set(*buffer, true);
            self.live_chunks.set(old_page, false);
            *buffer = old_page;
        }
        debug_assert_eq!(self.live_chunks.count_ones(), self.page_table.len());
    }

    /// Element-level swap across (possibly different) pages.
    pub fn swap_values(&mut self, a: (PageId, usize), b: (PageId, usize)) {
        let size = self.page_size();
        let ia = self.chunk_of(a.0) * size + a.1;
        let ib = self.chunk_of(b.0) * size + b.1;
        self.raw_mut().swap(ia, ib);
    }

    /// Resolves a local index of `data_block` to its chunk-relative position.
    #[inline]
    fn locate(&self, data_block: usize, index: usize) -> usize {
        let chunk = self.page_table[(data_block << self.num_page_qubits) | (index >> self.offset_bits)];
        (chunk << self.offset_bits) | (index & self.offset_mask)
    }

    /// Bounds-checked element lookup.
    pub fn at(&self, data_block: usize, index: usize) -> Option<&Complex> {
        if data_block >= self.num_data_blocks || index >> self.num_local_qubits != 0 {
            return None;
        }
        Some(&self.raw()[self.locate(data_block, index)])
    }

    pub fn at_mut(&mut self, data_block: usize, index: usize) -> Option<&mut Complex> {
        if data_block >= self.num_data_blocks || index >> self.num_local_qubits != 0 {
            return None;
        }
        let position = self.locate(data_block, index);
        Some(&mut self.raw_mut()[position])
    }

    /// Zeroes every live page of `data_block`.
    pub fn clear_block(&mut self, data_block: usize) {
        for page in 0..self.num_pages() {
            self.page_range_mut(PageId::new(data_block, page))
                .fill(Complex::new(0.0, 0.0));
        }
    }

    fn chunk_ptr(&mut self, id: PageId) -> *mut Complex {
        let chunk = self.chunk_of(id);
        // Safety: chunk < number of chunks in the mapping
        unsafe { (self.mapping.as_mut_ptr() as *mut Complex).add(chunk << self.offset_bits) }
    }

    /// Views over every live page, ordered by data block then page.
    pub(crate) fn page_views_mut(&mut self) -> Vec<FlatView<'_>> {
        let page_size = self.page_size();
        let mut views = Vec::with_capacity(self.page_table.len());
        for data_block in 0..self.num_data_blocks {
            for page in 0..self.num_pages() {
                let ptr = self.chunk_ptr(PageId::new(data_block, page));
                // Safety: distinct table entries name distinct chunks
                views.push(unsafe { FlatView::from_raw(ptr, page_size) });
            }
        }
        views
    }

    /// All pages of `data_block` behind one local index space.
    pub(crate) fn block_view_mut(&mut self, data_block: usize) -> PagedView<'_> {
        let pages = (0..self.num_pages())
            .map(|page| self.chunk_ptr(PageId::new(data_block, page)))
            .collect();
        unsafe { PagedView::new(pages, self.offset_bits) }
    }
}

impl Index<(usize, usize)> for PagedStateVector {
    type Output = Complex;

    /// `state[(data_block, index)]`
    #[inline]
    fn index(&self, (data_block, index): (usize, usize)) -> &Complex {
        &self.raw()[self.locate(data_block, index)]
    }
}

impl IndexMut<(usize, usize)> for PagedStateVector {
    #[inline]
    fn index_mut(&mut self, (data_block, index): (usize, usize)) -> &mut Complex {
        let position = self.locate(data_block, index);
        &mut self.raw_mut()[position]
    }
}

impl Drop for PagedStateVector {
    fn drop(&mut self) {
        // Ensure data hits the disk before we close
        if self._file.is_some() {
            let _ = self.mapping.flush();
        }
    }
}
