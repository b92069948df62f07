use crate::cpu::regs::Z80Registers;
use crate::error::BusError;

pub const MAX_IMAGE_SIZE: usize = 0x10000;
pub const MAX_IMAGE_BLOCKS: usize = 100;

/// One contiguous run of bytes in the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBlock {
    pub start: u16,
    pub len: usize,
}

/// A sparse program image, accumulated block by block and written out in
/// one bus grant.
pub struct MemoryImage {
    buffer: Vec<u8>,
    blocks: Vec<ImageBlock>,
    registers: Option<Z80Registers>,
}

impl MemoryImage {
    pub fn new() -> Self {
        Self {
            buffer: vec![0; MAX_IMAGE_SIZE],
            blocks: Vec::new(),
            registers: None,
        }
    }

    /// Copy `data` in at `addr`. A block that starts exactly where an
    /// existing one ends extends it. Bytes past the top of memory are
    /// dropped.
    pub fn add_block(&mut self, addr: u16, data: &[u8]) -> Result<(), BusError> {
        let start = addr as usize;
        let len = data.len().min(MAX_IMAGE_SIZE - start);
        if len < data.len() {
            log::warn!(
                "block at {addr:04x} truncated from {} to {len} bytes",
                data.len()
            );
        }
        if len == 0 {
            return Ok(());
        }

        let merge = self
            .blocks
            .iter_mut()
            .find(|b| b.start as usize + b.len == start);
        match merge {
            Some(block) => block.len += len,
            None => {
                if self.blocks.len() >= MAX_IMAGE_BLOCKS {
                    log::warn!("too many image blocks, dropping {addr:04x}");
                    return Err(BusError::ImageFull(MAX_IMAGE_BLOCKS));
                }
                self.blocks.push(ImageBlock { start: addr, len });
            }
        }
        self.buffer[start..start + len].copy_from_slice(&data[..len]);
        Ok(())
    }

    pub fn blocks(&self) -> &[ImageBlock] {
        &self.blocks
    }

    pub fn block_data(&self, block: &ImageBlock) -> &[u8] {
        let start = block.start as usize;
        &self.buffer[start..start + block.len]
    }

    pub fn set_registers(&mut self, regs: Z80Registers) {
        self.registers = Some(regs);
    }

    pub fn registers(&self) -> Option<&Z80Registers> {
        self.registers.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.registers.is_none()
    }

    /// Forget every block and the start registers.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.registers = None;
    }
}

impl Default for MemoryImage {
    fn default() -> Self {
        Self::new()
    }
}
