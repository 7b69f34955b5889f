// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use orbis_sdk::RuntimeBuilder;

#[test]
fn test_environment_overrides_everything() {
    std::env::set_var("ORBIS_STOP_TIMEOUT_MS", "1234");
    let config = RuntimeBuilder::new()
        .property("orbis.framework.stopTimeoutMs", 99)
        .resolve_config()
        .unwrap();
    assert_eq!(config.stop_timeout_ms, 1234);

    let config = RuntimeBuilder::new()
        .property("orbis.framework.stopTimeoutMs", 99)
        .without_env()
        .resolve_config()
        .unwrap();
    assert_eq!(config.stop_timeout_ms, 99);
    std::env::remove_var("ORBIS_STOP_TIMEOUT_MS");
}
