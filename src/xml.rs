//!
//! Internal APIs for assembling and rendering XML VTK documents.
//!
//! Documents are built as a tree of [`XmlElement`]s. Offsets of appended data are kept as
//! [`OffsetToken`]s in the tree and substituted once the appendix reports them, or at the latest
//! when the document is rendered together with a [`ResolvedAppendix`].
//!

use std::collections::BTreeMap;
use std::io::Write;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::appendix::{OffsetToken, ResolvedAppendix};
use crate::Error;

/// A file type descriptor of a XML VTK data file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FileType {
    pub storage: StorageFormat,
    pub data: DataType,
}

impl FileType {
    pub fn serial(data: DataType) -> FileType {
        FileType {
            storage: StorageFormat::Serial,
            data,
        }
    }

    pub fn parallel(data: DataType) -> FileType {
        FileType {
            storage: StorageFormat::Parallel,
            data,
        }
    }

    pub fn try_from_ext(ext: &str) -> Option<FileType> {
        Some(match ext {
            "vti" => FileType::serial(DataType::ImageData),
            "vtr" => FileType::serial(DataType::RectilinearGrid),
            "vts" => FileType::serial(DataType::StructuredGrid),
            "vtu" => FileType::serial(DataType::UnstructuredGrid),
            "pvti" => FileType::parallel(DataType::ImageData),
            "pvtr" => FileType::parallel(DataType::RectilinearGrid),
            "pvts" => FileType::parallel(DataType::StructuredGrid),
            "pvtu" => FileType::parallel(DataType::UnstructuredGrid),
            _ => return None,
        })
    }

    /// File extension without the leading dot.
    pub fn extension(&self) -> String {
        match self.storage {
            StorageFormat::Serial => self.data.extension().to_string(),
            StorageFormat::Parallel => format!("p{}", self.data.extension()),
        }
    }

    /// Value of the `type` attribute of the `VTKFile` element, which is also the name of the
    /// element holding the grid.
    pub fn type_name(&self) -> String {
        match self.storage {
            StorageFormat::Serial => self.data.name().to_string(),
            StorageFormat::Parallel => format!("P{}", self.data.name()),
        }
    }

    pub fn try_from_type_name(name: &str) -> Option<FileType> {
        match name.strip_prefix('P') {
            Some(serial) => DataType::try_from_name(serial).map(FileType::parallel),
            None => DataType::try_from_name(name).map(FileType::serial),
        }
    }
}

/// The storage format of a given XML VTK file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StorageFormat {
    Serial,
    Parallel,
}

/// The kind of grid stored in a XML VTK file.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataType {
    ImageData,
    RectilinearGrid,
    StructuredGrid,
    UnstructuredGrid,
}

impl DataType {
    pub fn name(self) -> &'static str {
        match self {
            DataType::ImageData => "ImageData",
            DataType::RectilinearGrid => "RectilinearGrid",
            DataType::StructuredGrid => "StructuredGrid",
            DataType::UnstructuredGrid => "UnstructuredGrid",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            DataType::ImageData => "vti",
            DataType::RectilinearGrid => "vtr",
            DataType::StructuredGrid => "vts",
            DataType::UnstructuredGrid => "vtu",
        }
    }

    pub fn try_from_name(name: &str) -> Option<DataType> {
        Some(match name {
            "ImageData" => DataType::ImageData,
            "RectilinearGrid" => DataType::RectilinearGrid,
            "StructuredGrid" => DataType::StructuredGrid,
            "UnstructuredGrid" => DataType::UnstructuredGrid,
            _ => return None,
        })
    }

    pub fn is_structured(self) -> bool {
        !matches!(self, DataType::UnstructuredGrid)
    }
}

/// Value of an attribute in the document tree.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    Text(String),
    /// Offset of an appended payload, known once the appendix is resolved.
    Offset(OffsetToken),
}

/// Content of an element besides its children.
#[derive(Clone, Debug, PartialEq)]
enum Content {
    Text(String),
    Appendix,
}

/// An element of a document under construction.
#[derive(Clone, Debug, PartialEq)]
pub struct XmlElement {
    name: String,
    attributes: Vec<(String, AttrValue)>,
    children: Vec<XmlElement>,
    content: Option<Content>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        XmlElement {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
            content: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_attribute(mut self, key: &str, value: impl ToString) -> Self {
        self.set_attribute(key, value);
        self
    }

    /// Sets an attribute, replacing a previous value of the same key.
    pub fn set_attribute(&mut self, key: &str, value: impl ToString) {
        self.set_value(key, AttrValue::Text(value.to_string()));
    }

    /// Sets an attribute to the offset of an appended payload.
    pub fn set_offset(&mut self, key: &str, token: OffsetToken) {
        self.set_value(key, AttrValue::Offset(token));
    }

    fn set_value(&mut self, key: &str, value: AttrValue) {
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((key.to_string(), value)),
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&AttrValue> {
        self.attributes
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.content = Some(Content::Text(text.into()));
    }

    /// Marks this element as the holder of the appended data.
    pub fn set_appendix_content(&mut self) {
        self.content = Some(Content::Appendix);
    }

    /// Adds a child and returns a reference to it.
    pub fn add_child(&mut self, child: XmlElement) -> &mut XmlElement {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    pub fn children(&self) -> &[XmlElement] {
        &self.children
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Returns the first child with the given name, adding it if there is none.
    pub fn child_or_insert(&mut self, name: &str) -> &mut XmlElement {
        match self.children.iter().position(|c| c.name == name) {
            Some(i) => &mut self.children[i],
            None => self.add_child(XmlElement::new(name)),
        }
    }

    /// Replaces offset placeholders in this element and its children with the given offsets.
    ///
    /// Placeholders whose token is missing are left for [`render`](XmlElement::render).
    pub fn fill_offsets(&mut self, offsets: &BTreeMap<OffsetToken, u64>) {
        for (_, value) in self.attributes.iter_mut() {
            if let AttrValue::Offset(token) = value {
                if let Some(offset) = offsets.get(token) {
                    *value = AttrValue::Text(offset.to_string());
                }
            }
        }
        for child in &mut self.children {
            child.fill_offsets(offsets);
        }
    }

    /// Renders the document.
    ///
    /// `appendix` provides offsets for attributes set with [`set_offset`] and the bytes written
    /// into the element marked with [`set_appendix_content`]. The XML declaration is omitted if
    /// `declaration` is `false`, e.g. because raw binary data makes the result invalid XML.
    ///
    /// [`set_offset`]: XmlElement::set_offset
    /// [`set_appendix_content`]: XmlElement::set_appendix_content
    pub fn render<W: Write>(
        &self,
        out: W,
        appendix: Option<&ResolvedAppendix>,
        declaration: bool,
    ) -> Result<(), Error> {
        let mut writer = Writer::new_with_indent(out, b' ', 2);
        if declaration {
            writer.write_event(Event::Decl(BytesDecl::new("1.0", None, None)))?;
        }
        write_element(&mut writer, self, appendix)?;
        writer.get_mut().write_all(b"\n")?;
        Ok(())
    }
}

fn write_element<W: Write>(
    writer: &mut Writer<W>,
    element: &XmlElement,
    appendix: Option<&ResolvedAppendix>,
) -> Result<(), Error> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        let value = match value {
            AttrValue::Text(text) => text.clone(),
            AttrValue::Offset(token) => appendix
                .and_then(|a| a.offset(*token))
                .ok_or_else(|| {
                    Error::InvalidState(format!(
                        "offset of \"{}\" in <{}> was never resolved",
                        key, element.name
                    ))
                })?
                .to_string(),
        };
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() && element.content.is_none() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    match &element.content {
        Some(Content::Text(text)) => {
            writer.write_event(Event::Text(BytesText::new(text)))?;
        }
        Some(Content::Appendix) => {
            let appendix = appendix.ok_or_else(|| {
                Error::InvalidState("appended data was never resolved".to_string())
            })?;
            let out = writer.get_mut();
            out.write_all(b"\n_")?;
            appendix.stream_to(out)?;
        }
        None => {}
    }
    for child in &element.children {
        write_element(writer, child, appendix)?;
    }
    writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appendix::Appendix;

    #[test]
    fn file_types() {
        let ft = FileType::try_from_ext("pvtu").unwrap();
        assert_eq!(ft, FileType::parallel(DataType::UnstructuredGrid));
        assert_eq!(ft.type_name(), "PUnstructuredGrid");
        assert_eq!(ft.extension(), "pvtu");
        assert_eq!(FileType::try_from_type_name("PUnstructuredGrid"), Some(ft));
        assert_eq!(
            FileType::try_from_type_name("ImageData"),
            Some(FileType::serial(DataType::ImageData))
        );
        assert_eq!(FileType::try_from_ext("vtk"), None);
    }

    #[test]
    fn render_with_offsets() -> Result<(), Error> {
        let mut appendix = Appendix::new();
        let a = appendix.add(|| Ok(b"abc".to_vec()));
        let b = appendix.add(|| Ok(b"de".to_vec()));

        let mut root = XmlElement::new("Root").with_attribute("type", "Test");
        let first = root.add_child(XmlElement::new("Array"));
        first.set_offset("offset", a);
        root.add_child(XmlElement::new("Array")).set_offset("offset", b);
        root.add_child(XmlElement::new("Inline")).set_text("1 < 2");
        root.add_child(XmlElement::new("AppendedData").with_attribute("encoding", "raw"))
            .set_appendix_content();

        let resolved = appendix.resolve()?;
        let mut out = Vec::new();
        root.render(&mut out, Some(&resolved), true)?;
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("<?xml version=\"1.0\"?>"));
        assert!(text.contains("<Array offset=\"0\"/>"));
        assert!(text.contains("<Array offset=\"3\"/>"));
        assert!(text.contains("<Inline>1 &lt; 2</Inline>"));
        assert!(text.contains("<AppendedData encoding=\"raw\">\n_abcde"));
        Ok(())
    }

    #[test]
    fn observed_offsets_fill_placeholders() -> Result<(), Error> {
        let mut seen = BTreeMap::new();
        let mut appendix = Appendix::new();
        let a = appendix.add(|| Ok(vec![0u8; 4]));
        let b = appendix.add(|| Ok(vec![0u8; 6]));
        let mut root = XmlElement::new("Root");
        root.add_child(XmlElement::new("Array")).set_offset("offset", a);
        root.add_child(XmlElement::new("Array")).set_offset("offset", b);

        appendix.set_observer(|token, offset| {
            seen.insert(token, offset);
        });
        appendix.resolve()?;
        root.fill_offsets(&seen);
        assert_eq!(
            root.children()[1].attribute("offset"),
            Some(&AttrValue::Text("4".to_string()))
        );

        // Nothing is left for the renderer to resolve.
        let mut out = Vec::new();
        root.render(&mut out, None, false)?;
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("<Array offset=\"0\"/>"));
        assert!(text.contains("<Array offset=\"4\"/>"));
        Ok(())
    }

    #[test]
    fn unresolved_offsets_fail() {
        let mut appendix = Appendix::new();
        let token = appendix.add(|| Ok(vec![]));
        let mut root = XmlElement::new("Root");
        root.set_offset("offset", token);
        assert!(matches!(
            root.render(Vec::new(), None, true),
            Err(Error::InvalidState(_))
        ));
    }
}
