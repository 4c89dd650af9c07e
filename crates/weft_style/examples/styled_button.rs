//! Styled Button Demo
//!
//! Builds a button with a style, a control template and a visual state
//! group, then drives it through hover and a pressed transition while the
//! engine logs what it does.
//!
//! Run with: RUST_LOG=weft_style=debug cargo run -p weft_style --example styled_button

use std::sync::Arc;
use std::time::Duration;

use weft_animation::{AnimationTarget, Easing, Storyboard, Timeline};
use weft_core::{Color, FrameworkConfig, PropertyRegistry, TypeKind};
use weft_style::{
    handler, Framework, FrameworkElementFactory, FrameworkTemplate, Result, RoutedEvent, Setter,
    Style, Trigger, VisualState, VisualStateGroup, VisualTransition,
};

const CONFIG: &str = r#"
max_tree_depth = 256

[compatibility]
loaded_dispatch = "deferred"
state_storyboard_handoff = "start-new-then-stop-old"
"#;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let mut registry = PropertyRegistry::new();
    let wk = *registry.well_known();
    let button_type = registry.register_type("Button", Some(wk.content_control), TypeKind::Element)?;
    let config = FrameworkConfig::from_toml_str(CONFIG)?;
    let mut fw = Framework::with_config(Arc::new(registry), config);

    fw.application_resources().insert("Accent", Color::BLUE)?;
    fw.application_resources().insert("AccentHover", Color::GREEN)?;

    let pressed = Storyboard::new().with_child(Timeline::to_value(
        AnimationTarget::named("Chrome", wk.opacity),
        0.6,
        Duration::ZERO,
    ));
    let states = VisualStateGroup::new("CommonStates")
        .with_state(VisualState::new("Normal"))
        .with_state(VisualState::new("Pressed").with_storyboard(pressed))
        .with_transition(
            VisualTransition::new()
                .with_generated_duration(Duration::from_millis(120))
                .with_generated_easing(Easing::EaseOutCubic),
        )
        .on_current_state_changed(Arc::new(|_, args| {
            tracing::info!(from = ?args.old_state, to = %args.new_state, "state changed");
        }));

    let template = FrameworkTemplate::control(Some(button_type))
        .visual_tree(
            FrameworkElementFactory::new(wk.control)
                .with_name("Chrome")
                .with_template_binding(wk.background, wk.background),
        )
        .visual_state_group(states)
        .build();

    let style = Style::builder(button_type)
        .setter(Setter::dynamic_resource(wk.background, "Accent"))
        .trigger(
            Trigger::property(wk.is_mouse_over, true)
                .with_setter(Setter::dynamic_resource(wk.background, "AccentHover")),
        )
        .build();

    let window = fw.create(wk.panel)?;
    fw.set_presentation_root(window, true)?;
    let button = fw.create(button_type)?;
    fw.set_value(button, wk.style, style)?;
    fw.set_value(button, wk.template, template)?;
    fw.add_handler(
        button,
        RoutedEvent::LOADED,
        handler(|_, args| tracing::info!(source = ?args.source, "button loaded")),
    )?;
    fw.add_visual_child(window, button)?;
    fw.run_dispatcher()?;

    let chrome = fw
        .get_template_child(button, "Chrome")
        .ok_or_else(|| weft_style::StyleError::InvalidTemplate("template has no Chrome".into()))?;
    tracing::info!(background = ?fw.get_value(chrome, wk.background), "idle");

    fw.set_value(button, wk.is_mouse_over, true)?;
    tracing::info!(background = ?fw.get_value(chrome, wk.background), "hovered");

    fw.application_resources().insert("AccentHover", Color::RED)?;
    fw.run_dispatcher()?;
    tracing::info!(background = ?fw.get_value(chrome, wk.background), "hover accent changed");

    fw.go_to_state(button, "Pressed", true)?;
    for _ in 0..4 {
        fw.tick(Duration::from_millis(40))?;
        tracing::info!(opacity = ?fw.get_value(chrome, wk.opacity), "tick");
    }

    fw.go_to_state(button, "Normal", false)?;
    tracing::info!(opacity = ?fw.get_value(chrome, wk.opacity), "released");
    Ok(())
}
