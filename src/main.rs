//! Tasm - Template Assembler Engine
//!
//! Demo entry point: loads a bundle (a file given on the command line, or a
//! built-in card) through the three-thread shell and prints what reached the
//! view layer.

use std::env;
use std::sync::Arc;

use serde_json::{Value, json};
use tasm::assembler::{JsSourceBundle, LoadOptions, LogDelegate};
use tasm::codec::{CompileOptions, TemplateBinaryWriter};
use tasm::element::PaintRecorder;
use tasm::monitor::EventTracker;
use tasm::resource::MemoryResourceLoader;
use tasm::shell::{EngineHandle, ScriptRuntime, Shell, ShellParts};
use tasm::ui_queue::QueueStrategy;
use tasm::value::TemplateData;
use tasm::vm::DeclarativeVmFactory;
use tasm::{NAME, TasmConfig, VERSION};

/// Script thread stand-in that logs what the engine sends it
#[derive(Default)]
struct LoggingScript {
    engine: Option<EngineHandle>,
}

impl ScriptRuntime for LoggingScript {
    fn attach(&mut self, engine: EngineHandle) {
        self.engine = Some(engine);
    }

    fn on_js_source_prepared(&mut self, source: JsSourceBundle) {
        log::info!("script: app {} ready with {} js files", source.url, source.js.len());
    }

    fn on_global_event(&mut self, name: &str, params: Value) {
        log::info!("script: global event {} {}", name, params);
    }
}

fn demo_card() -> Vec<u8> {
    let program = json!({
        "page": {
            "tag": "page",
            "children": [
                {"tag": "text", "text": "{{greeting}}"},
                {"tag": "view", "attributes": {"bindtap": "onTap"}}
            ]
        }
    });
    TemplateBinaryWriter::card()
        .compile_options(CompileOptions {
            enable_fiber_arch: true,
            ..CompileOptions::default()
        })
        .js("app-service.js", "console.log('hello')")
        .root_lepus(program.to_string().into_bytes())
        .encode()
}

fn main() {
    env_logger::init();
    println!("{} v{}", NAME, VERSION);

    let args: Vec<String> = env::args().collect();
    let (url, bytes) = match args.get(1) {
        Some(path) => match std::fs::read(path) {
            Ok(bytes) => (path.clone(), bytes),
            Err(err) => {
                eprintln!("cannot read {}: {}", path, err);
                std::process::exit(1);
            }
        },
        None => ("builtin://demo".to_string(), demo_card()),
    };

    let config = match TasmConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("bad configuration: {}", err);
            std::process::exit(1);
        }
    };

    let platform = Arc::new(PaintRecorder::new());
    let shell = match Shell::new(
        1,
        config,
        QueueStrategy::Sync,
        ShellParts {
            host: Arc::new(LogDelegate),
            script: Box::new(LoggingScript::default()),
            vm_factory: Arc::new(DeclarativeVmFactory::new()),
            platform: platform.clone(),
            resource_loader: Arc::new(MemoryResourceLoader::new()),
            global_pool: None,
            tracker: Arc::new(EventTracker::default()),
        },
    ) {
        Ok(shell) => shell,
        Err(err) => {
            eprintln!("failed to start threads: {}", err);
            std::process::exit(1);
        }
    };

    let data = TemplateData::new(json!({"greeting": "hello"}));
    shell.load_template(&url, bytes, Some(data), LoadOptions::default());
    let loaded = shell.with_assembler(|tasm| tasm.is_template_loaded()).unwrap_or(false);
    println!("loaded: {}", loaded);

    shell.update_data(
        TemplateData::new(json!({"greeting": "hello again"})),
        tasm::assembler::UpdatePageOption::from_native(),
    );
    let _ = shell.with_assembler(|_| ());

    for op in platform.ops() {
        println!("  {:?}", op);
    }
    shell.destroy();
}
