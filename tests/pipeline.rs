use std::fs;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use assetrun::bundler::{BundleReport, Bundler, BundlerConfig, Mode};
use assetrun::server::ServerOptions;
use assetrun::steps::templates::TemplateCompiler;
use assetrun::{BoxFuture, BundlerError, Context, Paths, Runner, Settings, TaskError, io, steps};
use camino::{Utf8Path, Utf8PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Writes one small file per entry instead of running a real bundler.
#[derive(Clone, Default)]
struct FakeBundler {
    runs: Arc<Mutex<Vec<Mode>>>,
}

impl Bundler for FakeBundler {
    fn bundle<'a>(
        &'a self,
        config: &'a BundlerConfig,
    ) -> BoxFuture<'a, Result<BundleReport, BundlerError>> {
        Box::pin(async move {
            config.check_entries()?;
            self.runs.lock().unwrap().push(config.mode());

            let mut outputs = Vec::new();
            for entry in config.entries() {
                let out = config.output().path_for(&entry.name);
                io::write(&out, format!("// {} {:?}\n", entry.name, config.mode())).unwrap();
                outputs.push(out);
            }

            Ok(BundleReport {
                outputs,
                log: String::new(),
            })
        })
    }
}

/// Wraps the template source in a paragraph, fails on anything containing
/// `broken`.
struct FakeTemplates;

impl TemplateCompiler for FakeTemplates {
    fn compile<'a>(
        &'a self,
        path: &'a Utf8Path,
        source: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<String>> {
        Box::pin(async move {
            if source.contains("broken") {
                return Err(anyhow!("{path}:1:1 unexpected token"));
            }
            Ok(format!("<p>{}</p>\n", source.trim()))
        })
    }
}

struct Project {
    _dir: tempfile::TempDir,
    paths: Paths,
    bundler: FakeBundler,
}

impl Project {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let paths = Settings::default().resolve(root).unwrap();

        Self {
            _dir: dir,
            paths,
            bundler: FakeBundler::default(),
        }
    }

    fn root(&self) -> &Utf8Path {
        &self.paths.root
    }

    fn write(&self, rel: &str, contents: &str) {
        io::write(&self.root().join(rel), contents).unwrap();
    }

    fn with_scripts(self) -> Self {
        self.write("assets/js/main.js", "import './modules/menu.js';");
        self.write("assets/js/jquery.main.js", "jQuery(function () {});");
        self.write("assets/js/modules/menu.js", "export default 1;");
        self
    }

    fn context(&self) -> Context {
        Context::new(self.paths.clone())
            .with_bundler(self.bundler.clone())
            .with_templates(FakeTemplates)
    }

    fn runner(&self) -> Runner {
        Runner::new(steps::registry(), self.context()).unwrap()
    }

    /// Every file below the root, relative to it.
    fn files(&self) -> Vec<Utf8PathBuf> {
        io::find(self.root(), "**/*")
            .unwrap()
            .into_iter()
            .map(|path| path.strip_prefix(self.root()).unwrap().to_path_buf())
            .collect()
    }
}

#[tokio::test]
async fn entry_table_has_one_existing_source_per_name() {
    let project = Project::new().with_scripts();
    let config = BundlerConfig::new(&project.paths, Mode::Production);

    let names: Vec<_> = config.entries().iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["main", "jquery.main"]);
    for entry in config.entries() {
        assert!(entry.path.is_file(), "{} is missing", entry.path);
    }
    config.check_entries().unwrap();
}

#[tokio::test]
async fn build_keeps_only_protected_scripts() {
    let project = Project::new().with_scripts();
    project.write("assets/js/jquery.min.js", "/* vendor */");
    project.write("js/main.js", "// old main");
    project.write("js/jquery.main.js", "// old jquery main");
    project.write("js/stale.js", "");
    project.write("js/main.js.map", "{}");
    project.write("js/chunks/0.js", "");

    project.runner().run("build").await.unwrap();

    let mut left: Vec<_> = fs::read_dir(project.root().join("js"))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    left.sort();
    assert_eq!(left, ["jquery.main.js", "jquery.min.js", "main.js"]);

    // Bundles are only replaced by the bundler, not by the cleanup.
    let main = fs::read_to_string(project.root().join("js/main.js")).unwrap();
    assert_eq!(main, "// old main");
}

#[tokio::test]
async fn sass_then_dist_yields_one_beautified_stylesheet() {
    let project = Project::new().with_scripts();
    project.write("assets/scss/_colors.scss", "$accent: #336699;");
    project.write("assets/scss/_layout.scss", "@mixin boxed { margin: 0 auto; }");
    project.write(
        "assets/scss/style.scss",
        "@import 'colors';\n@import 'layout';\n.page{@include boxed;a{color:$accent}}",
    );

    let runner = project.runner();

    runner.run("sass").await.unwrap();
    assert!(project.root().join("style.css").is_file());
    assert!(project.root().join("style.css.map").is_file());
    let compiled = fs::read_to_string(project.root().join("style.css")).unwrap();
    assert!(compiled.contains("/*# sourceMappingURL=style.css.map */"), "{compiled}");

    runner.run("dist").await.unwrap();

    let files = project.files();
    assert!(files.iter().all(|f| !f.as_str().ends_with(".map")), "{files:?}");

    let css: Vec<_> = files.iter().filter(|f| f.extension() == Some("css")).collect();
    assert_eq!(css, [&Utf8PathBuf::from("style.css")]);

    let main = fs::read_to_string(project.root().join("style.css")).unwrap();
    assert!(main.contains(".page {\n  margin: 0 auto;\n}"), "{main}");
    assert!(main.contains(".page a {\n  color: #336699;\n}"), "{main}");
    assert!(!main.contains("sourceMappingURL"), "{main}");

    assert_eq!(*project.bundler.runs.lock().unwrap(), [Mode::Production]);
}

#[tokio::test]
async fn broken_template_does_not_stop_siblings() {
    let project = Project::new();
    project.write("assets/about.pug", "about");
    project.write("assets/broken.pug", "broken");
    project.write("assets/index.pug", "index");
    project.write("assets/partials/head.pug", "head");
    io::write(&project.root().join("assets/aaa-latin1.pug"), [0x63, 0x61, 0x66, 0xe9]).unwrap();

    project.runner().run("pug").await.unwrap();

    let root = project.root();
    assert_eq!(
        fs::read_to_string(root.join("about.html")).unwrap(),
        "<p>about</p>\n"
    );
    assert_eq!(
        fs::read_to_string(root.join("index.html")).unwrap(),
        "<p>index</p>\n"
    );
    assert!(!root.join("broken.html").exists());
    assert!(!root.join("aaa-latin1.html").exists());
    assert!(!root.join("head.html").exists());
}

#[tokio::test]
async fn missing_bundle_entry_fails_the_run() {
    let project = Project::new();

    let err = project.runner().run("bundle-dev").await.unwrap_err();
    assert!(
        matches!(
            err,
            TaskError::Step {
                ref task,
                source: assetrun::StepError::Bundler(BundlerError::MissingEntry { .. }),
            } if task == "bundle-dev"
        ),
        "{err}"
    );
}

#[tokio::test]
async fn dist_stops_at_first_fatal_error() {
    let project = Project::new();
    project.write("assets/scss/style.scss", "a{color:red}");
    project.write("style.css", "a{color:red}");
    project.write("style.css.map", "{}");

    // No script entries, so `bundle-dist` fails and nothing after it runs.
    assert!(project.runner().run("dist").await.is_err());
    assert!(project.root().join("style.css.map").is_file());
}

#[tokio::test]
async fn optimized_images_are_cached_until_cleared() {
    let project = Project::new();
    let image = image::RgbImage::from_pixel(8, 8, image::Rgb([10, 20, 30]));
    let source = project.root().join("assets/images/icons/dot.png");
    fs::create_dir_all(source.parent().unwrap()).unwrap();
    image.save(&source).unwrap();
    project.write("assets/images/logo.svg", "<svg/>");
    project.write("assets/images/notes.txt", "not an image");

    let runner = project.runner();
    let out = project.root().join("images");

    runner.run("optimize-images").await.unwrap();
    assert!(out.join("icons/dot.png").is_file());
    assert_eq!(fs::read_to_string(out.join("logo.svg")).unwrap(), "<svg/>");
    assert!(!out.join("notes.txt").exists());

    fs::remove_file(out.join("icons/dot.png")).unwrap();
    runner.run("optimize-images").await.unwrap();
    assert!(!out.join("icons/dot.png").exists());

    runner.run("clear").await.unwrap();
    runner.run("optimize-images").await.unwrap();
    assert!(out.join("icons/dot.png").is_file());
}

/// Plain HTTP/1.1 GET, returning the raw response.
async fn get(address: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(address).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

#[tokio::test]
async fn default_starts_server_even_when_siblings_fail() {
    // No script entries: `bundle-dev` fails right away.
    let project = Project::new();
    project.write("index.html", "<html><body><h1>home</h1></body></html>");

    let context = project.context().with_server(ServerOptions {
        http_port: 0,
        reload_port: 0,
    });
    let runner = Runner::new(steps::registry(), context).unwrap();

    let handle = runner.spawn("default");

    let mut address = None;
    for _ in 0..100 {
        address = runner.context().server.address();
        if address.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let address = address.expect("dev server never started");
    let reload_port = runner.context().reloader.port().unwrap();

    let listing = get(address, "/").await;
    assert!(listing.starts_with("HTTP/1.1 200"), "{listing}");
    assert!(listing.contains("href=\"index.html\""), "{listing}");

    let page = get(address, "/index.html").await;
    assert!(page.starts_with("HTTP/1.1 200"), "{page}");
    assert!(page.contains("<h1>home</h1><script>"), "{page}");
    assert!(page.contains(&format!(":{reload_port}")), "{page}");

    let missing = get(address, "/nope.html").await;
    assert!(missing.starts_with("HTTP/1.1 404"), "{missing}");

    assert!(project.bundler.runs.lock().unwrap().is_empty());

    handle.abort();
}
