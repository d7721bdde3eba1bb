use kiln_headless_app::app::HeadlessApp;
use kiln_headless_app::outer_app::async_load_test::AsyncLoadTest;

fn main() {
    let outer_app = Box::new(AsyncLoadTest::default());
    HeadlessApp::run(outer_app);
}
