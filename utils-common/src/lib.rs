// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

#![no_std]

pub mod alloc;
pub mod bitmanip;
