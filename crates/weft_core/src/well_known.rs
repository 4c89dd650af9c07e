//! Framework types and properties the engine itself depends on
//!
//! Registered by [`PropertyRegistry::new`] before any user type, so their
//! handles are stable for the lifetime of the registry.

use crate::property::{
    PropertyFlags, PropertyId, PropertyMetadata, PropertyRegistry, TypeKey, TypeKind,
};
use crate::value::{Color, Value};

/// Handles to the built-in types and properties
#[derive(Clone, Copy, Debug)]
pub struct WellKnown {
    // Types
    pub dependency_object: TypeKey,
    pub framework_element: TypeKey,
    pub framework_content_element: TypeKey,
    pub control: TypeKey,
    pub content_control: TypeKey,
    pub content_presenter: TypeKey,
    pub grid_view_row_presenter: TypeKey,
    pub panel: TypeKey,
    pub grid: TypeKey,
    pub row_definition: TypeKey,
    pub column_definition: TypeKey,
    pub popup: TypeKey,
    pub model_visual_3d: TypeKey,
    pub freezable: TypeKey,
    pub collection: TypeKey,

    // Every tree object
    pub name: PropertyId,
    pub style: PropertyId,
    pub data_context: PropertyId,
    pub flow_direction: PropertyId,
    pub language: PropertyId,
    pub font_size: PropertyId,
    pub foreground: PropertyId,
    pub tag: PropertyId,

    // FrameworkElement
    pub visibility: PropertyId,
    pub is_mouse_over: PropertyId,
    pub opacity: PropertyId,

    // Control
    pub template: PropertyId,
    pub background: PropertyId,

    // ContentControl
    pub content: PropertyId,
    pub content_template: PropertyId,
    pub content_template_selector: PropertyId,
    pub content_string_format: PropertyId,

    // ContentPresenter
    pub presenter_content: PropertyId,
    pub presenter_content_template: PropertyId,
    pub presenter_content_template_selector: PropertyId,
    pub presenter_content_string_format: PropertyId,
    pub content_source: PropertyId,

    // GridViewRowPresenter
    pub row_presenter_content: PropertyId,
    pub row_presenter_columns: PropertyId,
}

impl WellKnown {
    pub(crate) fn placeholder() -> Self {
        let t = TypeKey::from_raw(u32::MAX);
        let p = PropertyId::placeholder();
        Self {
            dependency_object: t,
            framework_element: t,
            framework_content_element: t,
            control: t,
            content_control: t,
            content_presenter: t,
            grid_view_row_presenter: t,
            panel: t,
            grid: t,
            row_definition: t,
            column_definition: t,
            popup: t,
            model_visual_3d: t,
            freezable: t,
            collection: t,
            name: p,
            style: p,
            data_context: p,
            flow_direction: p,
            language: p,
            font_size: p,
            foreground: p,
            tag: p,
            visibility: p,
            is_mouse_over: p,
            opacity: p,
            template: p,
            background: p,
            content: p,
            content_template: p,
            content_template_selector: p,
            content_string_format: p,
            presenter_content: p,
            presenter_content_template: p,
            presenter_content_template_selector: p,
            presenter_content_string_format: p,
            content_source: p,
            row_presenter_content: p,
            row_presenter_columns: p,
        }
    }

    pub(crate) fn register(r: &mut PropertyRegistry) -> Self {
        let dependency_object = r.define_type("DependencyObject", None, TypeKind::Plain);
        let framework_element =
            r.define_type("FrameworkElement", Some(dependency_object), TypeKind::Element);
        let framework_content_element = r.define_type(
            "FrameworkContentElement",
            Some(dependency_object),
            TypeKind::ContentElement,
        );
        let control = r.define_type("Control", Some(framework_element), TypeKind::Element);
        let content_control = r.define_type("ContentControl", Some(control), TypeKind::Element);
        let content_presenter =
            r.define_type("ContentPresenter", Some(framework_element), TypeKind::Element);
        let grid_view_row_presenter = r.define_type(
            "GridViewRowPresenter",
            Some(framework_element),
            TypeKind::Element,
        );
        let panel = r.define_type("Panel", Some(framework_element), TypeKind::Element);
        let grid = r.define_type("Grid", Some(panel), TypeKind::Element);
        let row_definition = r.define_type(
            "RowDefinition",
            Some(framework_content_element),
            TypeKind::ContentElement,
        );
        let column_definition = r.define_type(
            "ColumnDefinition",
            Some(framework_content_element),
            TypeKind::ContentElement,
        );
        let popup = r.define_type("Popup", Some(framework_element), TypeKind::Element);
        let model_visual_3d = r.define_type("ModelVisual3D", None, TypeKind::Visual3D);
        let freezable = r.define_type("Freezable", None, TypeKind::Freezable);
        let collection = r.define_type("Collection", None, TypeKind::Collection);

        let force_inherit = PropertyFlags::INHERITS | PropertyFlags::OVERRIDES_INHERITANCE_BEHAVIOR;

        let name = r.define_property(dependency_object, "Name", PropertyMetadata::new(""));
        let style = r.define_property(dependency_object, "Style", PropertyMetadata::unset());
        let data_context = r.define_property(
            dependency_object,
            "DataContext",
            PropertyMetadata::unset().inherits(),
        );
        let flow_direction = r.define_property(
            dependency_object,
            "FlowDirection",
            PropertyMetadata::new("LeftToRight")
                .with_flags(force_inherit | PropertyFlags::AFFECTS_ARRANGE)
                .with_validator(|v| match v.as_str() {
                    Some("LeftToRight") | Some("RightToLeft") => Ok(()),
                    _ => Err("expected LeftToRight or RightToLeft".into()),
                }),
        );
        let language = r.define_property(
            dependency_object,
            "Language",
            PropertyMetadata::new("en-US").with_flags(force_inherit),
        );
        let font_size = r.define_property(
            dependency_object,
            "FontSize",
            PropertyMetadata::new(12.0)
                .inherits()
                .with_flags(PropertyFlags::AFFECTS_MEASURE),
        );
        let foreground = r.define_property(
            dependency_object,
            "Foreground",
            PropertyMetadata::new(Color::BLACK)
                .inherits()
                .with_flags(PropertyFlags::AFFECTS_RENDER),
        );
        let tag = r.define_property(dependency_object, "Tag", PropertyMetadata::unset());

        let visibility = r.define_property(
            framework_element,
            "Visibility",
            PropertyMetadata::new("Visible")
                .with_flags(PropertyFlags::AFFECTS_MEASURE)
                .with_validator(|v| match v.as_str() {
                    Some("Visible") | Some("Hidden") | Some("Collapsed") => Ok(()),
                    _ => Err("expected Visible, Hidden or Collapsed".into()),
                }),
        );
        let is_mouse_over =
            r.define_property(framework_element, "IsMouseOver", PropertyMetadata::new(false));
        let opacity = r.define_property(
            framework_element,
            "Opacity",
            PropertyMetadata::new(1.0)
                .with_flags(PropertyFlags::AFFECTS_RENDER)
                .with_validator(|v| match v {
                    Value::Float(f) if (0.0..=1.0).contains(f) => Ok(()),
                    _ => Err("expected a number between 0 and 1".into()),
                }),
        );

        let template = r.define_property(control, "Template", PropertyMetadata::unset());
        let background = r.define_property(
            control,
            "Background",
            PropertyMetadata::new(Color::TRANSPARENT).with_flags(PropertyFlags::AFFECTS_RENDER),
        );

        let content = r.define_property(content_control, "Content", PropertyMetadata::unset());
        let content_template =
            r.define_property(content_control, "ContentTemplate", PropertyMetadata::unset());
        let content_template_selector = r.define_property(
            content_control,
            "ContentTemplateSelector",
            PropertyMetadata::unset(),
        );
        let content_string_format = r.define_property(
            content_control,
            "ContentStringFormat",
            PropertyMetadata::unset(),
        );

        let presenter_content =
            r.define_property(content_presenter, "Content", PropertyMetadata::unset());
        let presenter_content_template =
            r.define_property(content_presenter, "ContentTemplate", PropertyMetadata::unset());
        let presenter_content_template_selector = r.define_property(
            content_presenter,
            "ContentTemplateSelector",
            PropertyMetadata::unset(),
        );
        let presenter_content_string_format = r.define_property(
            content_presenter,
            "ContentStringFormat",
            PropertyMetadata::unset(),
        );
        let content_source = r.define_property(
            content_presenter,
            "ContentSource",
            PropertyMetadata::new("Content"),
        );

        let row_presenter_content =
            r.define_property(grid_view_row_presenter, "Content", PropertyMetadata::unset());
        let row_presenter_columns =
            r.define_property(grid_view_row_presenter, "Columns", PropertyMetadata::unset());

        Self {
            dependency_object,
            framework_element,
            framework_content_element,
            control,
            content_control,
            content_presenter,
            grid_view_row_presenter,
            panel,
            grid,
            row_definition,
            column_definition,
            popup,
            model_visual_3d,
            freezable,
            collection,
            name,
            style,
            data_context,
            flow_direction,
            language,
            font_size,
            foreground,
            tag,
            visibility,
            is_mouse_over,
            opacity,
            template,
            background,
            content,
            content_template,
            content_template_selector,
            content_string_format,
            presenter_content,
            presenter_content_template,
            presenter_content_template_selector,
            presenter_content_string_format,
            content_source,
            row_presenter_content,
            row_presenter_columns,
        }
    }
}
