//! The descriptor a module's entry point returns, and the registry it is
//! handed to.

use crate::{
    Result, TargetAddr,
    image::ModuleImage,
    residency::ResidencyReport,
    runtime::{ModuleRuntime, TargetMemory},
};
use alloc::string::String;
use bitflags::bitflags;
use delegate::delegate;

use super::Manifest;

/// Words in the descriptor record: name, icon, start, stop, category.
pub const DESCRIPTOR_WORDS: usize = 5;
/// Longest name read from module memory.
pub const MAX_NAME_LEN: usize = 64;

bitflags! {
    /// Optional parts a descriptor provides.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const START = 1 << 0;
        const STOP = 1 << 1;
        const ICON = 1 << 2;
    }
}

/// A lifecycle callback a descriptor may provide.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Start,
    Stop,
}

/// Decoded copy of the descriptor a module returned.
///
/// Callback addresses point into module code and are only ever invoked
/// through a [`ModuleRuntime`] with the module's GOT base.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionDescriptor {
    addr: TargetAddr,
    name: String,
    icon: TargetAddr,
    start: TargetAddr,
    stop: TargetAddr,
    category: u32,
}

impl ExtensionDescriptor {
    /// Decodes the record at `addr`.
    pub fn read(mem: &mut dyn TargetMemory, addr: TargetAddr) -> Result<Self> {
        let mut words = [0u32; DESCRIPTOR_WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            *word = mem.read_u32(addr.wrapping_add(4 * i as u32))?;
        }
        let [name_ptr, icon, start, stop, category] = words;
        let name = if name_ptr == 0 {
            String::new()
        } else {
            mem.read_c_str(name_ptr, MAX_NAME_LEN)?
        };
        Ok(Self {
            addr,
            name,
            icon,
            start,
            stop,
            category,
        })
    }

    /// Address of the record in module memory.
    #[inline]
    pub fn addr(&self) -> TargetAddr {
        self.addr
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn category(&self) -> u32 {
        self.category
    }

    /// Address of the icon image, if any.
    pub fn icon(&self) -> Option<TargetAddr> {
        (self.icon != 0).then_some(self.icon)
    }

    pub fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::empty();
        caps.set(Capabilities::START, self.start != 0);
        caps.set(Capabilities::STOP, self.stop != 0);
        caps.set(Capabilities::ICON, self.icon != 0);
        caps
    }

    /// Address of the callback for `event`, if provided.
    pub fn callback(&self, event: Lifecycle) -> Option<TargetAddr> {
        let addr = match event {
            Lifecycle::Start => self.start,
            Lifecycle::Stop => self.stop,
        };
        (addr != 0).then_some(addr)
    }
}

/// A resident extension and everything known about it.
#[derive(Clone, Debug)]
pub struct LoadedExtension {
    pub(crate) id: String,
    pub(crate) image: ModuleImage,
    pub(crate) manifest: Option<Manifest>,
    pub(crate) descriptor: Option<ExtensionDescriptor>,
    pub(crate) residency: ResidencyReport,
}

impl LoadedExtension {
    /// Directory name the extension was installed under.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    pub fn image(&self) -> &ModuleImage {
        &self.image
    }

    #[inline]
    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    /// The registered descriptor; `None` when the entry point failed.
    #[inline]
    pub fn descriptor(&self) -> Option<&ExtensionDescriptor> {
        self.descriptor.as_ref()
    }

    #[inline]
    pub fn residency(&self) -> &ResidencyReport {
        &self.residency
    }

    /// Whether the entry point succeeded and the descriptor was handed to
    /// the registry.
    #[inline]
    pub fn is_registered(&self) -> bool {
        self.descriptor.is_some()
    }

    /// Invokes a lifecycle callback, returning `None` when the descriptor
    /// does not provide it.
    pub fn invoke<R>(
        &self,
        runtime: &mut R,
        mem: &mut dyn TargetMemory,
        event: Lifecycle,
        args: &[u32],
    ) -> Result<Option<u32>>
    where
        R: ModuleRuntime + ?Sized,
    {
        let Some(func) = self.descriptor.as_ref().and_then(|d| d.callback(event)) else {
            return Ok(None);
        };
        debug!("[manager] {}: {event:?} -> {func:#010x}", self.id);
        runtime
            .call(mem, func, self.image.got_base(), args)
            .map(Some)
    }

    delegate! {
        to self.image {
            /// Entry point address, Thumb bit included.
            pub fn entry(&self) -> TargetAddr;
            /// GOT base the module's code expects in `r9`.
            pub fn got_base(&self) -> TargetAddr;
            /// Bytes of XIP flash the module occupies.
            pub fn flash_bytes(&self) -> usize;
        }
    }
}

/// The host side that presents registered extensions.
pub trait AppRegistry {
    fn register(&mut self, id: &str, descriptor: &ExtensionDescriptor);
}

impl AppRegistry for () {
    fn register(&mut self, _id: &str, _descriptor: &ExtensionDescriptor) {}
}

impl<F: FnMut(&str, &ExtensionDescriptor)> AppRegistry for F {
    fn register(&mut self, id: &str, descriptor: &ExtensionDescriptor) {
        self(id, descriptor)
    }
}
